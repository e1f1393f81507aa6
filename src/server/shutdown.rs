//! Coordinated wind-down of the server's long-lived tasks.
//!
//! Three kinds of background work outlive any single request: the janitor sweeping expired
//! upload sessions and aged trash, the tree-refresh loop rebuilding the filtered snapshot on
//! mutation events, and the media workers draining the processing queue. Each of them holds a
//! [`StopSignal`]. When the shutdown indicator fires, the server calls [`Shutdown::begin`],
//! every signal resolves, and the tasks finish the sweep, refresh or image they are in the
//! middle of before exiting. [`Shutdown::drained`] returns once the last signal has been
//! dropped, so the server never abandons a half-written thumbnail or a half-swept temp
//! directory inside the grace period.

use tokio::sync::{Mutex, mpsc, watch};

/// Shutdown coordinator owned by the server.
#[derive(Debug)]
pub struct Shutdown {
    stop: watch::Sender<bool>,
    running: Mutex<Option<mpsc::Sender<()>>>,
    drained: Mutex<mpsc::Receiver<()>>,
}

impl Shutdown {
    /// Creates a coordinator with no tasks registered yet.
    pub fn new() -> Shutdown {
        let (stop, _) = watch::channel(false);
        let (running, drained) = mpsc::channel(1);
        Shutdown {
            stop,
            running: Mutex::new(Some(running)),
            drained: Mutex::new(drained),
        }
    }

    /// Hands out the stop signal a background task selects on next to its queue or ticker.
    /// A task reports completion by simply letting the signal go out of scope when its loop
    /// exits.
    pub async fn register(&self) -> StopSignal {
        StopSignal {
            stop: self.stop.subscribe(),
            _running: self.running.lock().await.clone(),
        }
    }

    /// Starts the wind-down: every outstanding [`StopSignal`] resolves, and a task registering
    /// after this point gets an already-resolved one.
    pub async fn begin(&self) {
        let _ = self.stop.send(true);
        // Give up the coordinator's own completion slot so drained() waits on tasks alone.
        drop(self.running.lock().await.take());
    }

    /// Waits until every registered task has dropped its signal.
    pub async fn drained(&self) {
        let _ = self.drained.lock().await.recv().await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Shutdown::new()
    }
}

/// The stop side held by the janitor, the tree-refresh loop and each media worker. Dropping
/// it tells the coordinator the holder is done.
#[derive(Debug)]
pub struct StopSignal {
    stop: watch::Receiver<bool>,
    /// Held, never read: dropping it is how the holder reports completion.
    _running: Option<mpsc::Sender<()>>,
}

impl StopSignal {
    /// Resolves when shutdown begins; immediately if it already has. The holder should finish
    /// its current unit of work and return, dropping the signal.
    pub async fn stopped(&mut self) {
        // A closed channel means the coordinator itself is gone, which is also a stop.
        let _ = self.stop.wait_for(|stopping| *stopping).await;
    }
}

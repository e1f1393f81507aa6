//! Fan-out of mutation events to subscribers.
//!
//! Semantics are best-effort: sends never block, and a slow subscriber drops events rather
//! than stalling publishers. Subscribers (SSE clients, the media processor) must tolerate
//! missed events and reconcile by polling.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// The kinds of namespace mutation an event can announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// First upload of a path.
    Create,
    /// Overwrite of an existing file.
    Modify,
    /// Soft-delete.
    Delete,
    /// Version rollback.
    Version,
}

impl EventKind {
    /// The wire name used as the SSE event type.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Modify => "modify",
            EventKind::Delete => "delete",
            EventKind::Version => "version",
        }
    }
}

/// A mutation event as delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Path the mutation applied to.
    pub path: String,
    /// Version after the mutation; `0` where not applicable.
    pub version: i64,
    /// Content hash after the mutation; empty where not applicable.
    pub hash: String,
    /// Size after the mutation.
    pub size: i64,
    /// User who performed the mutation.
    pub user: String,
    /// When the mutation committed.
    pub at: DateTime<Utc>,
}

impl Event {
    /// Builds an event stamped with the current time.
    pub fn new(kind: EventKind, path: impl Into<String>, version: i64, hash: impl Into<String>, size: i64, user: impl Into<String>) -> Event {
        Event {
            kind,
            path: path.into(),
            version,
            hash: hash.into(),
            size,
            user: user.into(),
            at: Utc::now(),
        }
    }
}

/// Publish/subscribe hub over an in-process broadcast channel.
#[derive(Debug)]
pub struct Broadcaster {
    tx: broadcast::Sender<Event>,
}

impl Broadcaster {
    /// Creates a broadcaster whose per-subscriber buffer holds `capacity` events before a lagging
    /// subscriber starts losing the oldest ones.
    pub fn new(capacity: usize) -> Broadcaster {
        let (tx, _) = broadcast::channel(capacity);
        Broadcaster { tx }
    }

    /// Publishes an event to all current subscribers. Never blocks; with no subscribers the
    /// event is simply dropped.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Registers a new subscriber. Events published from this point on are delivered in
    /// publish order until the subscriber lags past the buffer.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Broadcaster::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let hub = Broadcaster::new(8);
        let mut rx = hub.subscribe();
        hub.publish(Event::new(EventKind::Create, "/a", 1, "h1", 1, "u"));
        hub.publish(Event::new(EventKind::Modify, "/a", 2, "h2", 2, "u"));

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Create);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, EventKind::Modify);
        assert_eq!(second.version, 2);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let hub = Broadcaster::new(8);
        hub.publish(Event::new(EventKind::Delete, "/gone", 0, "", 0, "u"));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_drops_oldest() {
        let hub = Broadcaster::new(2);
        let mut rx = hub.subscribe();
        for i in 0..5 {
            hub.publish(Event::new(EventKind::Create, format!("/f{i}"), 1, "", 0, "u"));
        }
        // The first recv reports the lag, then the newest buffered events arrive.
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(_))));
        assert_eq!(rx.recv().await.unwrap().path, "/f3");
    }
}

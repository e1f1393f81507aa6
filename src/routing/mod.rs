//! The storage router: resolves which object store back-end serves a given file or upload.
//!
//! The router holds a process-wide registry of location id → back-end with one flagged
//! default. Resolution prefers the entry's persisted location, then the group's configured
//! location, then the default. Registry mutations are rare; reads take a shared lock.

use crate::error::{Error, Result};
use haven_core::storage::ObjectStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// The id under which the initial default back-end is registered.
pub const DEFAULT_LOCATION: &str = "default";

struct Registry {
    backends: HashMap<String, Arc<dyn ObjectStore>>,
    group_locations: HashMap<String, String>,
    default_id: String,
}

/// Resolves a back-end per path/group/file. Safe for concurrent use.
pub struct StorageRouter {
    inner: RwLock<Registry>,
}

impl StorageRouter {
    /// Creates a router with one registered back-end flagged as the default.
    pub fn new(default_backend: Arc<dyn ObjectStore>) -> StorageRouter {
        let mut backends = HashMap::new();
        backends.insert(DEFAULT_LOCATION.to_string(), default_backend);
        StorageRouter {
            inner: RwLock::new(Registry {
                backends,
                group_locations: HashMap::new(),
                default_id: DEFAULT_LOCATION.to_string(),
            }),
        }
    }

    /// Registers a back-end under `location_id`, replacing any previous registration.
    pub fn register(&self, location_id: &str, backend: Arc<dyn ObjectStore>) {
        let mut reg = self.inner.write().expect("router lock poisoned");
        reg.backends.insert(location_id.to_string(), backend);
    }

    /// Flags `location_id` as the default. The location must be registered.
    pub fn set_default(&self, location_id: &str) -> Result<()> {
        let mut reg = self.inner.write().expect("router lock poisoned");
        if !reg.backends.contains_key(location_id) {
            return Err(Error::Internal(format!("unknown storage location {location_id}")));
        }
        reg.default_id = location_id.to_string();
        Ok(())
    }

    /// Routes every upload for `group_id` to `location_id`.
    pub fn assign_group(&self, group_id: &str, location_id: &str) -> Result<()> {
        let mut reg = self.inner.write().expect("router lock poisoned");
        if !reg.backends.contains_key(location_id) {
            return Err(Error::Internal(format!("unknown storage location {location_id}")));
        }
        reg.group_locations.insert(group_id.to_string(), location_id.to_string());
        Ok(())
    }

    /// Resolves the back-end for an existing file: its persisted location if set, else the
    /// group's location, else the default.
    pub fn resolve_for_file(&self, location_id: Option<&str>, group_id: Option<&str>) -> Result<Arc<dyn ObjectStore>> {
        let reg = self.inner.read().expect("router lock poisoned");
        let id = match location_id {
            Some(id) => id,
            None => group_id.and_then(|g| reg.group_locations.get(g).map(String::as_str)).unwrap_or(&reg.default_id),
        };
        reg.backends
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("unknown storage location {id}")))
    }

    /// Resolves the back-end for a new upload, returning the chosen location id so the caller
    /// can persist it on the entry and later reads resolve the same back-end.
    pub fn resolve_for_upload(&self, group_id: Option<&str>) -> Result<(Arc<dyn ObjectStore>, String)> {
        let reg = self.inner.read().expect("router lock poisoned");
        let id = group_id
            .and_then(|g| reg.group_locations.get(g).map(String::as_str))
            .unwrap_or(&reg.default_id)
            .to_string();
        let backend = reg
            .backends
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("unknown storage location {id}")))?;
        Ok((backend, id))
    }
}

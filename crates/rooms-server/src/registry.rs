//! Rooms owned by this process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::room::RoomHandle;

struct RoomEntry {
    handle: RoomHandle,
    created_at: Instant,
}

/// Namespace → room handle for rooms whose task runs here.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, RoomEntry>>,
    creation: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RoomRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize room creation for `ns` on this process.
    ///
    /// Held across the existence check and the bind so two local connections
    /// cannot both create the room.
    pub async fn lock_creation(&self, ns: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.creation.lock().entry(ns.to_owned()).or_default());
        lock.lock_owned().await
    }

    /// Whether a room for `ns` is owned here.
    pub fn contains(&self, ns: &str) -> bool {
        self.rooms.lock().contains_key(ns)
    }

    /// Handle of the room for `ns`.
    pub fn get(&self, ns: &str) -> Option<RoomHandle> {
        self.rooms.lock().get(ns).map(|entry| entry.handle.clone())
    }

    /// Register a room. Returns `false` if one is already registered.
    pub fn insert(&self, handle: RoomHandle) -> bool {
        let mut rooms = self.rooms.lock();
        if rooms.contains_key(handle.ns()) {
            return false;
        }
        let _ = rooms.insert(
            handle.ns().to_owned(),
            RoomEntry {
                handle,
                created_at: Instant::now(),
            },
        );
        true
    }

    /// Forget the room for `ns`. Returns how long it was registered.
    pub fn remove(&self, ns: &str) -> Option<std::time::Duration> {
        let entry = self.rooms.lock().remove(ns)?;
        self.prune_creation(ns);
        Some(entry.created_at.elapsed())
    }

    /// Drop the creation lock for `ns` unless it is held or awaited.
    pub fn prune_creation(&self, ns: &str) {
        let mut creation = self.creation.lock();
        if creation.get(ns).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            let _ = creation.remove(ns);
        }
    }

    /// Namespaces with a room here.
    pub fn namespaces(&self) -> Vec<String> {
        self.rooms.lock().keys().cloned().collect()
    }

    /// Number of rooms.
    pub fn len(&self) -> usize {
        self.rooms.lock().len()
    }

    /// Whether there are no rooms.
    pub fn is_empty(&self) -> bool {
        self.rooms.lock().is_empty()
    }
}

//! Connections open on this process.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rooms_protocol::{ClientSet, WireSocket};
use tracing::debug;

use super::connection::ClientConnection;

/// All open connections, keyed by id.
#[derive(Default)]
pub struct ClientRegistry {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
}

impl ClientRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    pub fn add(&self, connection: Arc<ClientConnection>) {
        let _ = self
            .connections
            .write()
            .insert(connection.id.clone(), connection);
    }

    /// Unregister a connection.
    pub fn remove(&self, id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.write().remove(id)
    }

    /// Connection by id.
    pub fn get(&self, id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(id).cloned()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Connections in `ns`.
    pub fn ns_connections(&self, ns: &str) -> Vec<Arc<ClientConnection>> {
        self.connections
            .read()
            .values()
            .filter(|conn| conn.identity.ns == ns)
            .cloned()
            .collect()
    }

    /// Close every connection in `ns`. Returns how many were closed.
    pub fn close_ns(&self, ns: &str, code: u16, reason: &str) -> usize {
        let targets = self.ns_connections(ns);
        for conn in &targets {
            conn.close(code, reason);
        }
        debug!(ns, code, count = targets.len(), "closed namespace connections");
        targets.len()
    }

    /// Close every connection.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        let targets: Vec<_> = self.connections.read().values().cloned().collect();
        for conn in &targets {
            conn.close(code, reason);
        }
        targets.len()
    }
}

impl ClientSet for ClientRegistry {
    type Socket = ClientConnection;

    fn by_id(&self, id: &str) -> Option<Arc<ClientConnection>> {
        self.get(id)
    }

    fn scan(&self, visit: &mut dyn FnMut(&Arc<ClientConnection>)) {
        let snapshot: Vec<_> = self.connections.read().values().cloned().collect();
        for conn in &snapshot {
            visit(conn);
        }
    }
}

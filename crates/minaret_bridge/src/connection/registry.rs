//! Registry of live connections.
//!
//! The accept path inserts, each connection task removes itself on exit, and
//! broadcasts or shutdown iterate concurrently. Iteration works on a
//! snapshot and never holds a shard guard while sending.

use super::client::ConnectionHandle;
use super::ConnectionId;
use crate::error::ConnectionError;
use crate::protocol::{self, Opcode};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Live connections keyed by id, shared by the accept loop and every
/// connection task.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh connection id.
    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registers an upgraded connection.
    pub fn insert(&self, handle: ConnectionHandle) {
        self.connections.insert(handle.id(), handle);
    }

    /// Deregisters a connection, returning its handle if it was present.
    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.remove(&id).map(|(_, handle)| handle)
    }

    /// A clone of the handle registered under `id`.
    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Clones every live handle so callers can act on them without holding
    /// registry locks.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Sends `text` to every live connection.
    ///
    /// # Returns
    ///
    /// How many connections accepted the frame, or an error if `text` does
    /// not fit in a single frame.
    pub fn broadcast_text(&self, text: &str) -> Result<usize, ConnectionError> {
        let frame = protocol::build_frame(Opcode::Text, text.as_bytes())?;
        let mut delivered = 0;
        for handle in self.snapshot() {
            match handle.send_encoded(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("📪 Broadcast skipped connection {}: {}", handle.id(), e),
            }
        }
        Ok(delivered)
    }

    /// Requests a close on every connection registered right now.
    pub fn close_all(&self) -> usize {
        let handles = self.snapshot();
        for handle in &handles {
            handle.close();
        }
        handles.len()
    }

    /// Forgets every connection without signalling them.
    pub fn clear(&self) {
        self.connections.clear();
    }
}

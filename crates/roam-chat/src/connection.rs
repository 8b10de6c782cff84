//! Live client transports, one per user.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use roam_core::types::UserId;

use crate::protocol::ServerMessage;

/// Outbound half of a client connection.
pub type Transport = mpsc::Sender<ServerMessage>;

/// Identifies one registration, so a closing connection only removes
/// itself and never a newer one for the same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

struct Entry {
    id: ConnectionId,
    transport: Transport,
}

/// Maps each user to their single live transport.
#[derive(Default)]
pub struct ConnectionManager {
    connections: Mutex<HashMap<UserId, Entry>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<UserId, Entry>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `transport` to `user`, replacing any earlier one.
    pub fn register(&self, user: UserId, transport: Transport) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let previous = self.connections().insert(user.clone(), Entry { id, transport });
        if previous.is_some() {
            tracing::info!(user = %user, "Replaced existing connection");
        } else {
            tracing::info!(user = %user, "User connected");
        }
        id
    }

    /// Drop whatever transport `user` has. Returns whether one existed.
    pub fn unregister(&self, user: &UserId) -> bool {
        let removed = self.connections().remove(user).is_some();
        if removed {
            tracing::info!(user = %user, "User disconnected");
        }
        removed
    }

    /// Drop `user`'s transport only if it is still registration `id`.
    pub fn release(&self, user: &UserId, id: ConnectionId) -> bool {
        let mut connections = self.connections();
        if !connections.get(user).is_some_and(|entry| entry.id == id) {
            return false;
        }
        connections.remove(user);
        drop(connections);
        tracing::info!(user = %user, "User disconnected");
        true
    }

    /// Deliver `message` to `user`. Returns false if the user has no live
    /// transport or it has closed.
    pub async fn send(&self, user: &UserId, message: ServerMessage) -> bool {
        let transport = match self.connections().get(user) {
            Some(entry) => entry.transport.clone(),
            None => return false,
        };
        deliver(user, transport, message).await
    }

    /// Deliver `message` only while `user` is still bound to registration
    /// `id`. A connection replaced by a newer one gets false here and never
    /// writes into its successor's transport.
    pub async fn send_to(&self, user: &UserId, id: ConnectionId, message: ServerMessage) -> bool {
        let transport = match self.connections().get(user) {
            Some(entry) if entry.id == id => entry.transport.clone(),
            Some(_) => {
                tracing::debug!(user = %user, "Connection replaced, message dropped");
                return false;
            }
            None => return false,
        };
        deliver(user, transport, message).await
    }

    pub fn active_count(&self) -> usize {
        self.connections().len()
    }
}

async fn deliver(user: &UserId, transport: Transport, message: ServerMessage) -> bool {
    match transport.send(message).await {
        Ok(()) => true,
        Err(_) => {
            tracing::debug!(user = %user, "Transport closed, message dropped");
            false
        }
    }
}

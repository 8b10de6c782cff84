//! Per-user conversation sessions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use uuid::Uuid;

use roam_core::types::{Session, SessionId, UserId};

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<SessionId, Session>,
    current: HashMap<UserId, SessionId>,
}

/// Creates and looks up conversation sessions.
///
/// Sessions live for the life of the process. A user's most recently
/// resolved session is remembered so a reconnect without an explicit
/// session id continues the same conversation.
#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return `requested` if it names a session owned by `user`, otherwise
    /// create a fresh session for `user`.
    pub fn resolve(&self, user: &UserId, requested: Option<&SessionId>) -> SessionId {
        let mut state = self.state();

        if let Some(id) = requested {
            match state.sessions.get(id) {
                Some(session) if &session.owner == user => {
                    let id = id.clone();
                    state.current.insert(user.clone(), id.clone());
                    return id;
                }
                Some(_) => {
                    tracing::warn!(user = %user, session = %id, "Session belongs to another user");
                }
                None => {
                    tracing::debug!(user = %user, session = %id, "Unknown session requested");
                }
            }
        }

        let session = Session {
            id: SessionId::new(Uuid::new_v4().to_string()),
            owner: user.clone(),
            created_at: Utc::now(),
        };
        let id = session.id.clone();
        state.sessions.insert(id.clone(), session);
        state.current.insert(user.clone(), id.clone());
        tracing::info!(user = %user, session = %id, "Created session");
        id
    }

    /// The session `user` most recently resolved, if any.
    pub fn current(&self, user: &UserId) -> Option<SessionId> {
        self.state().current.get(user).cloned()
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.state().sessions.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_resolve_creates_session() {
        let registry = SessionRegistry::new();
        let user = UserId::new("u1");
        let id = registry.resolve(&user, None);

        let session = registry.get(&id).unwrap();
        assert_eq!(session.owner, user);
        assert_eq!(registry.current(&user), Some(id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_reuses_existing() {
        let registry = SessionRegistry::new();
        let user = UserId::new("u1");
        let first = registry.resolve(&user, None);
        let again = registry.resolve(&user, Some(&first));
        assert_eq!(first, again);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown_id_creates_new() {
        let registry = SessionRegistry::new();
        let user = UserId::new("u1");
        let bogus = SessionId::new("does-not-exist");
        let id = registry.resolve(&user, Some(&bogus));
        assert_ne!(id, bogus);
        assert!(registry.get(&bogus).is_none());
        assert!(registry.get(&id).is_some());
    }

    #[test]
    fn test_resolve_foreign_session_creates_new() {
        let registry = SessionRegistry::new();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let alice_session = registry.resolve(&alice, None);

        let bob_session = registry.resolve(&bob, Some(&alice_session));
        assert_ne!(bob_session, alice_session);
        assert_eq!(registry.get(&bob_session).unwrap().owner, bob);
        assert_eq!(registry.current(&alice), Some(alice_session));
    }

    #[test]
    fn test_current_tracks_latest() {
        let registry = SessionRegistry::new();
        let user = UserId::new("u1");
        assert!(registry.current(&user).is_none());
        let first = registry.resolve(&user, None);
        let second = registry.resolve(&user, None);
        assert_ne!(first, second);
        assert_eq!(registry.current(&user), Some(second));

        registry.resolve(&user, Some(&first));
        assert_eq!(registry.current(&user), Some(first));
    }

    #[test]
    fn test_concurrent_resolve_yields_distinct_ids() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.resolve(&UserId::new(format!("u{i}")), None))
            })
            .collect();
        let mut ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(registry.len(), 8);
    }
}

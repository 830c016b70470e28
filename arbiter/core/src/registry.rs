//! Session Registry
//!
//! All live sessions keyed by [`SessionId`]. Each session is independent: no
//! state is shared between them beyond the configuration they were created
//! with.
//!
//! # Thread Safety
//!
//! The map sits behind a `parking_lot::RwLock`. Lookups take a read lock and
//! clone the handle out; the lock is never held across an `.await`.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use crate::config::ArbiterConfig;
use crate::messages::SessionId;
use crate::session::{Session, SessionHandle};
use crate::transport::FrameSender;

/// Registry of running sessions
pub struct SessionRegistry {
    config: ArbiterConfig,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    /// Create an empty registry; new sessions use `config`
    #[must_use]
    pub fn new(config: ArbiterConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Configuration handed to new sessions
    #[must_use]
    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    /// Spawn a session for `user_id` delivering frames through `sender`
    ///
    /// Must be called from within a tokio runtime.
    pub fn create<S: FrameSender + 'static>(
        &self,
        user_id: impl Into<String>,
        sender: S,
    ) -> SessionHandle {
        let id = SessionId::new();
        let handle = Session::spawn(id.clone(), user_id, self.config.clone(), sender);
        self.sessions.write().insert(id.clone(), handle.clone());
        tracing::info!(session = %id, user = handle.user_id(), "Session registered");
        handle
    }

    /// Look up a session
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove a session and tear it down
    ///
    /// Returns whether the session was registered.
    pub async fn remove(&self, id: &SessionId) -> bool {
        let handle = self.sessions.write().remove(id);
        match handle {
            Some(handle) => {
                handle.shutdown().await;
                tracing::info!(session = %id, "Session removed");
                true
            }
            None => false,
        }
    }

    /// Number of registered sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// IDs of all registered sessions
    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Drop sessions whose task has already ended
    ///
    /// Returns the number of sessions removed.
    pub fn prune_closed(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|id, handle| {
            let open = !handle.is_closed();
            if !open {
                tracing::debug!(session = %id, "Pruning closed session");
            }
            open
        });
        before - sessions.len()
    }

    /// Tear down every session
    pub async fn shutdown_all(&self) {
        let handles: Vec<SessionHandle> = self.sessions.write().drain().map(|(_, h)| h).collect();
        let count = handles.len();
        for handle in handles {
            handle.shutdown().await;
        }
        tracing::info!(sessions = count, "All sessions shut down");
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sessions = self.sessions.read();
        f.debug_struct("SessionRegistry")
            .field("session_count", &sessions.len())
            .field("sessions", &sessions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{AppId, DisplayRequest};
    use crate::transport::RecordingSender;

    #[tokio::test]
    async fn test_create_get_remove() {
        let registry = SessionRegistry::new(ArbiterConfig::default());
        assert!(registry.is_empty());

        let handle = registry.create("user-1", RecordingSender::new());
        let id = handle.id().clone();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids(), vec![id.clone()]);
        assert_eq!(registry.get(&id).unwrap().user_id(), "user-1");

        assert!(registry.remove(&id).await);
        assert!(handle.is_closed());
        assert!(registry.get(&id).is_none());
        assert!(!registry.remove(&id).await);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let registry = SessionRegistry::new(ArbiterConfig::default());
        let first_frames = RecordingSender::new();
        let second_frames = RecordingSender::new();
        let first = registry.create("alice", first_frames.clone());
        let second = registry.create("bob", second_frames.clone());

        first.app_started(AppId::from("weather")).await.unwrap();
        let shown = second
            .display(DisplayRequest::text_wall("weather", "Sunny"))
            .await
            .unwrap();

        // Booting in alice's session does not block bob
        assert!(shown);
        assert_eq!(second_frames.len(), 1);
        assert_eq!(first.snapshot().await.unwrap().booting, vec![AppId::from("weather")]);
        assert!(second.snapshot().await.unwrap().booting.is_empty());
    }

    #[tokio::test]
    async fn test_prune_and_shutdown_all() {
        let registry = SessionRegistry::new(ArbiterConfig::default());
        let closed = registry.create("alice", RecordingSender::new());
        let open = registry.create("bob", RecordingSender::new());

        closed.shutdown().await;
        assert_eq!(registry.prune_closed(), 1);
        assert_eq!(registry.len(), 1);

        registry.shutdown_all().await;
        assert!(registry.is_empty());
        assert!(open.is_closed());
    }
}

//! Process-wide map of live attendance sessions.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::AttendanceError;
use crate::session::{Session, SessionKey};

/// Owns every live [`Session`], at most one per [`SessionKey`].
///
/// Inserts and removals take the write lock and so exclude each other and
/// any lookup in progress. Handles returned by [`get`](Self::get) stay
/// valid after removal, but a removed session is always inactive.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionKey, Arc<Session>>>,
    cooldown: Duration,
}

impl SessionRegistry {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            cooldown,
        }
    }

    /// Start a fresh session under `key`.
    ///
    /// A session already registered under `key` is replaced without being
    /// committed; it is marked inactive so frames still in flight for it fail.
    pub async fn start(&self, key: SessionKey, now: DateTime<Utc>) -> Arc<Session> {
        let session = Arc::new(Session::new(key.clone(), now, self.cooldown));
        let replaced = self
            .sessions
            .write()
            .await
            .insert(key.clone(), Arc::clone(&session));

        if let Some(old) = replaced {
            old.deactivate();
            tracing::warn!(
                session = %key.id(),
                started_at = %old.started_at(),
                "replaced an uncommitted session"
            );
        }
        tracing::info!(session = %key.id(), "session started");
        session
    }

    pub async fn get(&self, key: &SessionKey) -> Result<Arc<Session>, AttendanceError> {
        self.sessions
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| AttendanceError::NotFound(key.id()))
    }

    /// Remove the session under `key` and mark it inactive.
    pub async fn stop(&self, key: &SessionKey) -> Result<Arc<Session>, AttendanceError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(key)
            .ok_or_else(|| AttendanceError::NotFound(key.id()))?;
        session.deactivate();
        tracing::info!(session = %key.id(), "session stopped");
        Ok(session)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

//! Session repository interface
//!
//! The session record is the sole shared mutable resource in the core, so
//! the store contract is get / put / compare-and-swap keyed by session id;
//! the version-guarded swap is what makes two concurrent round submissions
//! resolve to exactly one winner. Production storage lives in the
//! `session-store` crate; [`MemoryStore`] here backs the core's own tests.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::session::Session;
use crate::types::SessionId;
use crate::Result;

/// Storage contract for TSS session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session by id
    async fn get(&self, session_id: &SessionId) -> Result<Option<Session>>;

    /// Insert or overwrite a session unconditionally
    async fn put(&self, session: Session) -> Result<()>;

    /// Replace the stored session only if its current version equals
    /// `expected_version`. Returns false when another writer won.
    async fn compare_and_swap(&self, expected_version: u64, session: Session) -> Result<bool>;
}

/// In-memory store for tests
#[derive(Clone, Default)]
pub struct MemoryStore {
    sessions: Arc<DashMap<SessionId, Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, session_id: &SessionId) -> Result<Option<Session>> {
        Ok(self.sessions.get(session_id).map(|entry| entry.clone()))
    }

    async fn put(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.session_id, session);
        Ok(())
    }

    async fn compare_and_swap(&self, expected_version: u64, session: Session) -> Result<bool> {
        match self.sessions.entry(session.session_id) {
            Entry::Occupied(mut entry) if entry.get().version == expected_version => {
                entry.insert(session);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

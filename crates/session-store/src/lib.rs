//! In-process storage backends
//!
//! Concurrent-map storage for the two record kinds the service owns: TSS
//! session records behind the core's [`SessionStore`] contract, and
//! commit-reveal bootstrap records with a secondary token-hash index for
//! idempotent commits. Both stores expose a sweep for a periodic cleanup
//! task; expiry is otherwise enforced lazily by the owning state machines.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use tss_core::bootstrap::{CommitRevealSession, CommitRevealState};
use tss_core::session::Session;
use tss_core::store::SessionStore;
use tss_core::types::OperationType;
use tss_core::{Error, Result, SessionId};

/// Production store for TSS session records
#[derive(Clone, Default)]
pub struct SessionRepository {
    sessions: Arc<DashMap<SessionId, Session>>,
}

impl SessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions past their expiry. Returns the number removed.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        let removed = before - self.sessions.len();
        if removed > 0 {
            debug!(removed, "Swept expired sessions");
        }
        removed
    }
}

#[async_trait::async_trait]
impl SessionStore for SessionRepository {
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

/// Store for commit-reveal bootstrap records.
///
/// Records are reachable by session id and by token hash; the token-hash
/// index makes a repeated commit for the same token land on the existing
/// live record instead of forking a second handshake.
#[derive(Clone, Default)]
pub struct BootstrapStore {
    sessions: Arc<DashMap<SessionId, CommitRevealSession>>,
    by_token: Arc<DashMap<[u8; 32], SessionId>>,
}

impl BootstrapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a commit. Idempotent per token hash: a live record for the
    /// same commitment is returned as-is.
    pub fn commit(
        &self,
        operation_type: OperationType,
        client_ephemeral_pubkey: [u8; 32],
        token_hash: [u8; 32],
        now: DateTime<Utc>,
    ) -> CommitRevealSession {
        if let Some(id) = self.by_token.get(&token_hash).map(|entry| *entry) {
            if let Some(existing) = self.sessions.get(&id) {
                if existing.state == CommitRevealState::Created && !existing.is_expired(now) {
                    return existing.clone();
                }
            }
        }

        let session =
            CommitRevealSession::commit(operation_type, client_ephemeral_pubkey, token_hash, now);
        self.by_token.insert(token_hash, session.session_id);
        self.sessions.insert(session.session_id, session.clone());
        debug!(session_id = %session.session_id, "Bootstrap commit recorded");
        session
    }

    pub fn get(&self, session_id: &SessionId) -> Option<CommitRevealSession> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    /// Run the reveal step against the stored record, in place
    pub fn reveal(
        &self,
        session_id: &SessionId,
        token: &[u8],
        now: DateTime<Utc>,
    ) -> Result<CommitRevealSession> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        entry.reveal(token, now)?;
        Ok(entry.clone())
    }

    /// Mark the record spent after the share transfer completes
    pub fn consume(&self, session_id: &SessionId) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        entry.consume()
    }

    /// Drop expired and consumed records. Returns the number removed.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            session.state != CommitRevealState::Consumed && !session.is_expired(now)
        });
        self.by_token
            .retain(|_, id| self.sessions.contains_key(id));
        let removed = before - self.sessions.len();
        if removed > 0 {
            debug!(removed, "Swept bootstrap records");
        }
        removed
    }
}

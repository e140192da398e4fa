//! TSS session records and the session state machine
//!
//! A session is the unit of ownership and concurrency control for one
//! multi-round operation. The record carries the lifecycle state, an
//! optimistic-concurrency version, an authenticated flag set by a
//! successful `signin` round, and the private round material the server
//! side holds between rounds.

mod machine;

pub use machine::{EddsaServerKey, KeyVault, RoundOutput, RoundPayload, SessionMachine};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ecdsa::{PresignOutput, TripleEntity, TriplePublic};
use crate::types::{Identity, OperationType, SessionId, SessionState, WalletId};

/// Session lifetime; an expired session aborts on its next touch
pub fn session_ttl() -> Duration {
    Duration::minutes(10)
}

/// Server-held round material between advances.
///
/// Exactly one variant is live at a time. Private material is released
/// (reset to `Idle`) when the round that spends it completes and whenever
/// the session reaches a terminal state.
#[derive(Clone, Serialize, Deserialize)]
pub enum RoundState {
    /// No round material held
    Idle,
    /// Triples dealt, waiting for the presign round to spend them
    TriplesDealt {
        entity: TripleEntity,
        public: TriplePublic,
    },
    /// Presignature ready, waiting for a digest to sign
    Presigned { output: PresignOutput },
    /// EdDSA key material dealt, waiting for round 1 commitments
    EddsaKeyed,
    /// EdDSA round 1 exchanged, waiting for the round 2 signature share
    EddsaCommitted {
        server_nonces: Vec<u8>,
        client_commitments: Vec<u8>,
        server_commitments: Vec<u8>,
    },
}

/// One TSS session record
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    /// Immutable for the session lifetime
    pub operation_type: OperationType,
    pub wallet_id: WalletId,
    pub identity: Identity,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Optimistic-concurrency version, bumped on every mutation
    pub version: u64,
    /// Set once a `signin` round has verified the caller's shares
    pub authenticated: bool,
    pub round: RoundState,
}

impl Session {
    /// Open a fresh session in the `Created` state
    pub fn new(
        operation_type: OperationType,
        wallet_id: WalletId,
        identity: Identity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: SessionId::new_v4(),
            operation_type,
            wallet_id,
            identity,
            state: SessionState::Created,
            created_at: now,
            updated_at: now,
            expires_at: now + session_ttl(),
            version: 0,
            authenticated: false,
            round: RoundState::Idle,
        }
    }

    /// Byte-for-byte ownership check; both fields must match
    pub fn is_owned_by(&self, identity: &str, wallet_id: &str) -> bool {
        self.identity == identity && self.wallet_id == wallet_id
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

//! Core engine for threshold-signature sessions.
//!
//! The crate is organized around one write path: a [`session::SessionMachine`]
//! that owns every session mutation, consults the static [`policy`] table for
//! what an operation may do, and hands round payloads to the signing engines —
//! two-party threshold ECDSA over secp256k1 ([`ecdsa`]) and two-party FROST
//! Ed25519 ([`eddsa`]). Around it sit the [`shamir`] share assembler used by
//! the authentication rounds and the [`bootstrap`] commit-reveal handshake
//! that gates share transfer to and from key-share nodes.
//!
//! Persistence is abstracted behind [`store::SessionStore`]; the production
//! store lives in its own crate, the service surface in another.

pub mod bootstrap;
pub mod ecdsa;
pub mod eddsa;
pub mod error;
pub mod policy;
pub mod session;
pub mod shamir;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use session::{RoundOutput, RoundPayload, Session, SessionMachine};
pub use types::{ApiName, EcdsaSignature, OperationType, SessionId, SessionState, WalletId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

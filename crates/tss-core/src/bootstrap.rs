//! Commit-reveal bootstrap protocol
//!
//! Lets a client prove possession of an authentication token to multiple
//! independent key-share nodes without exposing the token up front: the
//! client first commits to `hash(token)` alongside an ephemeral X25519 key,
//! then reveals the token itself. A node that only ever sees the commit
//! learns nothing reusable.
//!
//! After a successful reveal, a symmetric session key is derived via
//! authenticated key agreement between the client ephemeral key and the
//! node's long-term key, domain-separated by [`PROTOCOL_LABEL`], and used
//! to seal the subsequent share-transfer payloads.

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, KeyInit, Nonce};
use chrono::{DateTime, Duration, Utc};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::types::{OperationType, SessionId};
use crate::{Error, Result};

/// Domain-separation label for session-key derivation
pub const PROTOCOL_LABEL: &[u8] = b"shard-signer/bootstrap/v1";

/// Commit lifetime; a reveal after this must restart from commit
pub fn commit_ttl() -> Duration {
    Duration::minutes(5)
}

/// Lifecycle of a commit-reveal session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitRevealState {
    Created,
    Revealed,
    Expired,
    Consumed,
}

/// A single commit-reveal handshake with one key-share node.
///
/// Retrievable both by `session_id` (continuation) and by `token_hash`
/// (idempotent replay detection); the store keeps both indexes pointing at
/// the same record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRevealSession {
    pub session_id: SessionId,
    pub operation_type: OperationType,
    /// Client's ephemeral X25519 public key
    pub client_ephemeral_pubkey: [u8; 32],
    /// SHA-256 commitment to the authentication token
    pub token_hash: [u8; 32],
    pub expires_at: DateTime<Utc>,
    pub state: CommitRevealState,
}

/// SHA-256 commitment over a token
pub fn token_hash(token: &[u8]) -> [u8; 32] {
    Sha256::digest(token).into()
}

impl CommitRevealSession {
    /// Open a new session from a client commit
    pub fn commit(
        operation_type: OperationType,
        client_ephemeral_pubkey: [u8; 32],
        token_hash: [u8; 32],
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4(),
            operation_type,
            client_ephemeral_pubkey,
            token_hash,
            expires_at: now + commit_ttl(),
            state: CommitRevealState::Created,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check the revealed token against the stored commitment.
    ///
    /// Succeeds at most once per Created session. Expiry is checked before
    /// the hash so a stale-but-correct token still reports `Expired`
    /// ("restart from commit"), not a credential failure. The comparison is
    /// constant-time.
    pub fn reveal(&mut self, token: &[u8], now: DateTime<Utc>) -> Result<()> {
        match self.state {
            CommitRevealState::Created => {}
            CommitRevealState::Expired => return Err(Error::Expired),
            CommitRevealState::Revealed | CommitRevealState::Consumed => {
                return Err(Error::SessionTerminal)
            }
        }

        if self.is_expired(now) {
            self.state = CommitRevealState::Expired;
            return Err(Error::Expired);
        }

        let computed = token_hash(token);
        if !bool::from(computed.ct_eq(&self.token_hash)) {
            return Err(Error::AuthenticationFailed);
        }

        self.state = CommitRevealState::Revealed;
        Ok(())
    }

    /// Mark the session spent after the share transfer completes
    pub fn consume(&mut self) -> Result<()> {
        if self.state != CommitRevealState::Revealed {
            return Err(Error::SessionTerminal);
        }
        self.state = CommitRevealState::Consumed;
        Ok(())
    }
}

fn derive_key(shared_secret: &[u8; 32]) -> [u8; 32] {
    let hkdf = hkdf::Hkdf::<Sha256>::new(Some(PROTOCOL_LABEL), shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand(b"session key", &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

/// Node-side session key: long-term node secret against the client's
/// ephemeral public key
pub fn node_session_key(node_secret: &StaticSecret, client_ephemeral_pubkey: &[u8; 32]) -> [u8; 32] {
    let shared = node_secret.diffie_hellman(&PublicKey::from(*client_ephemeral_pubkey));
    derive_key(shared.as_bytes())
}

/// Client-side session key: ephemeral secret against the node's long-term
/// public key. Consumes the ephemeral secret; it is single-use.
pub fn client_session_key(client_secret: EphemeralSecret, node_pubkey: &PublicKey) -> [u8; 32] {
    let shared = client_secret.diffie_hellman(node_pubkey);
    derive_key(shared.as_bytes())
}

/// Encrypt a share-transfer payload under a derived session key.
///
/// Output layout: 12-byte random nonce followed by the ciphertext.
pub fn seal_share<R: CryptoRng + RngCore>(
    key: &[u8; 32],
    plaintext: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let mut nonce = [0u8; 12];
    rng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::Crypto("Share payload encryption failed".into()))?;

    let mut sealed = nonce.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a sealed share-transfer payload
pub fn open_share(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < 12 {
        return Err(Error::ProtocolViolation("Sealed payload too short".into()));
    }
    let (nonce, ciphertext) = sealed.split_at(12);
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn created_session(token: &[u8]) -> CommitRevealSession {
        CommitRevealSession::commit(
            OperationType::SignIn,
            rand::random(),
            token_hash(token),
            Utc::now(),
        )
    }

    #[test]
    fn correct_reveal_succeeds_exactly_once() {
        let mut session = created_session(b"authn-token");

        session.reveal(b"authn-token", Utc::now()).unwrap();
        assert_eq!(session.state, CommitRevealState::Revealed);

        let err = session.reveal(b"authn-token", Utc::now()).unwrap_err();
        assert!(matches!(err, Error::SessionTerminal));
    }

    #[test]
    fn wrong_token_never_succeeds() {
        let mut session = created_session(b"authn-token");

        for _ in 0..3 {
            let err = session.reveal(b"guessed-token", Utc::now()).unwrap_err();
            assert!(matches!(err, Error::AuthenticationFailed));
            assert_eq!(session.state, CommitRevealState::Created);
        }

        // Still revealable with the right token.
        session.reveal(b"authn-token", Utc::now()).unwrap();
    }

    #[test]
    fn correct_token_after_expiry_reports_expired() {
        let mut session = created_session(b"authn-token");
        let late = Utc::now() + commit_ttl() + Duration::seconds(1);

        let err = session.reveal(b"authn-token", late).unwrap_err();
        assert!(matches!(err, Error::Expired));
        assert_eq!(session.state, CommitRevealState::Expired);

        // Expired is sticky, even back at a valid time.
        let err = session.reveal(b"authn-token", Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Expired));
    }

    #[test]
    fn consume_requires_reveal() {
        let mut session = created_session(b"authn-token");
        assert!(session.consume().is_err());

        session.reveal(b"authn-token", Utc::now()).unwrap();
        session.consume().unwrap();
        assert_eq!(session.state, CommitRevealState::Consumed);
    }

    #[test]
    fn both_sides_derive_the_same_session_key() {
        let node_secret = StaticSecret::random_from_rng(OsRng);
        let node_public = PublicKey::from(&node_secret);

        let client_secret = EphemeralSecret::random_from_rng(OsRng);
        let client_public = PublicKey::from(&client_secret);

        let client_key = client_session_key(client_secret, &node_public);
        let node_key = node_session_key(&node_secret, client_public.as_bytes());

        assert_eq!(client_key, node_key);
    }

    #[test]
    fn sealed_share_round_trips_and_rejects_tampering() {
        let key: [u8; 32] = rand::random();
        let payload = b"node share ciphertext body";

        let mut sealed = seal_share(&key, payload, &mut OsRng).unwrap();
        assert_eq!(open_share(&key, &sealed).unwrap(), payload);

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            open_share(&key, &sealed),
            Err(Error::AuthenticationFailed)
        ));
    }
}

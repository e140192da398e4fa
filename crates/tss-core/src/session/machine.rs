//! Session state machine
//!
//! [`SessionMachine`] is the single write path for session records. Every
//! advance follows the same shape: load, check ownership, check expiry,
//! check the operation's policy table, run the requested round engine, then
//! publish the mutated record with a version-guarded compare-and-swap. Two
//! concurrent advances against the same session resolve to exactly one
//! winner; the loser gets a protocol violation and must restart.
//!
//! Ownership and not-found failures never mutate the record. Policy
//! violations, ordering violations, and engine failures drive the session
//! to `Failed` and release its round material.

use dashmap::DashMap;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{RoundState, Session};
use crate::ecdsa::{
    self, EcdsaKeyShare, KeygenMsg1, PresignMsg1, SignMsg1, TripleEntity, TriplePublic,
};
use crate::shamir::{self, NodeShare};
use crate::store::SessionStore;
use crate::types::{ApiName, EcdsaSignature, OperationType, SessionId, SessionState, WalletId};
use crate::{eddsa, policy, Error, Result};

/// Server-side FROST key material for one wallet
#[derive(Clone, Serialize, Deserialize)]
pub struct EddsaServerKey {
    pub key_package: Vec<u8>,
    pub public_key_package: Vec<u8>,
    pub verifying_key: [u8; 32],
}

/// Long-lived key material, keyed by wallet.
///
/// Populated by the keygen rounds and read by every later signing session
/// for the same wallet.
#[derive(Default)]
pub struct KeyVault {
    ecdsa: DashMap<WalletId, EcdsaKeyShare>,
    eddsa: DashMap<WalletId, EddsaServerKey>,
}

impl KeyVault {
    pub fn ecdsa_share(&self, wallet_id: &str) -> Option<EcdsaKeyShare> {
        self.ecdsa.get(wallet_id).map(|entry| entry.clone())
    }

    pub fn eddsa_key(&self, wallet_id: &str) -> Option<EddsaServerKey> {
        self.eddsa.get(wallet_id).map(|entry| entry.clone())
    }

    fn store_ecdsa(&self, wallet_id: WalletId, share: EcdsaKeyShare) {
        self.ecdsa.insert(wallet_id, share);
    }

    fn store_eddsa(&self, wallet_id: WalletId, key: EddsaServerKey) {
        self.eddsa.insert(wallet_id, key);
    }
}

/// Vault mutation staged by a round; applied only after the session write
/// wins its version race
enum VaultWrite {
    Ecdsa(WalletId, EcdsaKeyShare),
    Eddsa(WalletId, EddsaServerKey),
}

/// Client input for one round advance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RoundPayload {
    /// Node shares unlocking the caller's identity
    SignIn {
        shares: Vec<NodeShare>,
        threshold: usize,
    },
    Keygen {
        msg: KeygenMsg1,
    },
    Triples,
    Presign {
        msg: PresignMsg1,
    },
    Sign {
        digest: [u8; 32],
        msg: SignMsg1,
    },
    /// Rotate node shares: reconstruct, then deal a fresh split
    Reshare {
        shares: Vec<NodeShare>,
        threshold: usize,
        new_count: usize,
        new_threshold: usize,
    },
    EddsaKeygen,
    EddsaRound1 {
        /// 32-byte wire identifier of the submitting participant
        participant: [u8; 32],
        client_commitments: Vec<u8>,
    },
    EddsaRound2 {
        participant: [u8; 32],
        message: Vec<u8>,
        client_signature_share: Vec<u8>,
    },
}

/// Server output for one round advance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RoundOutput {
    SignedIn,
    Keygen {
        msg: KeygenMsg1,
        #[serde(with = "crate::types::point_serde")]
        public_key: [u8; 33],
    },
    Triples {
        entity: TripleEntity,
        public: TriplePublic,
    },
    Presign {
        msg: PresignMsg1,
    },
    Sign {
        msg: SignMsg1,
        signature: EcdsaSignature,
    },
    Reshared {
        shares: Vec<NodeShare>,
    },
    EddsaKeygen {
        client_key_package: Vec<u8>,
        public_key_package: Vec<u8>,
        verifying_key: [u8; 32],
    },
    EddsaRound1 {
        server_commitments: Vec<u8>,
    },
    EddsaRound2 {
        signature: Vec<u8>,
    },
}

/// The single write path for session records
pub struct SessionMachine<S> {
    store: S,
    vault: KeyVault,
}

impl<S: SessionStore> SessionMachine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            vault: KeyVault::default(),
        }
    }

    pub fn vault(&self) -> &KeyVault {
        &self.vault
    }

    /// Open a new session owned by `identity` over `wallet_id`
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        operation_type: OperationType,
        wallet_id: WalletId,
        identity: String,
    ) -> Result<Session> {
        let session = Session::new(operation_type, wallet_id, identity, chrono::Utc::now());
        info!(session_id = %session.session_id, %operation_type, "Session created");
        self.store.put(session.clone()).await?;
        Ok(session)
    }

    /// Fetch a session after verifying ownership
    pub async fn get(
        &self,
        session_id: &SessionId,
        identity: &str,
        wallet_id: &str,
    ) -> Result<Session> {
        let session = self.load(session_id).await?;
        if !session.is_owned_by(identity, wallet_id) {
            return Err(Error::OwnershipMismatch);
        }
        Ok(session)
    }

    /// Advance a session by one round of `api`
    #[instrument(skip(self, payload), fields(%session_id, api = ?api))]
    pub async fn advance(
        &self,
        session_id: &SessionId,
        identity: &str,
        wallet_id: &str,
        api: ApiName,
        payload: RoundPayload,
    ) -> Result<RoundOutput> {
        let mut session = self.load(session_id).await?;
        if !session.is_owned_by(identity, wallet_id) {
            warn!("Ownership mismatch on advance");
            return Err(Error::OwnershipMismatch);
        }

        let now = chrono::Utc::now();
        if session.is_expired(now) && !session.state.is_terminal() {
            // Lazy expiry: abort in place, then report.
            self.transition(session, SessionState::Aborted).await;
            return Err(Error::Expired);
        }
        if session.state.is_terminal() {
            return Err(Error::SessionTerminal);
        }

        if !policy::is_api_allowed(session.operation_type, api) {
            let op = session.operation_type;
            self.transition(session, SessionState::Failed).await;
            return Err(Error::ProtocolViolation(format!(
                "API {api:?} is not allowed for operation {op}"
            )));
        }

        match self.dispatch(&mut session, api, payload) {
            Ok((output, vault_write)) => {
                let expected = session.version;
                session.state = if policy::is_final_api(session.operation_type, api) {
                    session.round = RoundState::Idle;
                    SessionState::Completed
                } else {
                    SessionState::InProgress
                };
                session.version += 1;
                session.updated_at = now;
                let state = session.state;
                if !self.store.compare_and_swap(expected, session).await? {
                    warn!("Lost session write race");
                    return Err(Error::ProtocolViolation(
                        "Concurrent session update".into(),
                    ));
                }
                // Only the winning round may touch long-lived key material.
                match vault_write {
                    Some(VaultWrite::Ecdsa(wallet_id, share)) => {
                        self.vault.store_ecdsa(wallet_id, share)
                    }
                    Some(VaultWrite::Eddsa(wallet_id, key)) => {
                        self.vault.store_eddsa(wallet_id, key)
                    }
                    None => {}
                }
                debug!(?state, "Round accepted");
                Ok(output)
            }
            Err(e) => {
                warn!(error = %e, "Round rejected");
                self.transition(session, SessionState::Failed).await;
                Err(e)
            }
        }
    }

    /// Abort a session. Idempotent on already-aborted sessions.
    #[instrument(skip(self), fields(%session_id))]
    pub async fn abort(
        &self,
        session_id: &SessionId,
        identity: &str,
        wallet_id: &str,
    ) -> Result<()> {
        let session = self.load(session_id).await?;
        if !session.is_owned_by(identity, wallet_id) {
            return Err(Error::OwnershipMismatch);
        }
        match session.state {
            SessionState::Aborted => Ok(()),
            state if state.is_terminal() => Err(Error::SessionTerminal),
            _ => {
                if !self.transition(session, SessionState::Aborted).await {
                    return Err(Error::ProtocolViolation(
                        "Concurrent session update".into(),
                    ));
                }
                info!("Session aborted");
                Ok(())
            }
        }
    }

    async fn load(&self, session_id: &SessionId) -> Result<Session> {
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// Drive a session to a terminal state, releasing its round material.
    /// Best effort under the version guard; a lost race means another
    /// writer already settled the record.
    async fn transition(&self, mut session: Session, state: SessionState) -> bool {
        let expected = session.version;
        session.state = state;
        session.round = RoundState::Idle;
        session.version += 1;
        session.updated_at = chrono::Utc::now();
        matches!(
            self.store.compare_and_swap(expected, session).await,
            Ok(true)
        )
    }

    /// Run the round engine for `api`. Ordering guards live here: each
    /// round states which round material it expects to find. Key-vault
    /// mutations are returned staged, not applied.
    fn dispatch(
        &self,
        session: &mut Session,
        api: ApiName,
        payload: RoundPayload,
    ) -> Result<(RoundOutput, Option<VaultWrite>)> {
        let round = std::mem::replace(&mut session.round, RoundState::Idle);
        match (api, payload, round) {
            (ApiName::SignIn, RoundPayload::SignIn { shares, threshold }, round) => {
                // The reconstructed secret proves possession of a
                // qualifying share set; it is dropped on the spot.
                let _secret = shamir::assemble(&shares, threshold)?;
                session.authenticated = true;
                session.round = round;
                Ok((RoundOutput::SignedIn, None))
            }

            (ApiName::Keygen, RoundPayload::Keygen { msg }, RoundState::Idle) => {
                let (state, server_msg) =
                    ecdsa::keygen_round1(session.session_id, ecdsa::Party::P1, &mut OsRng);
                let share = ecdsa::keygen_finish(state, &msg)?;
                let public_key = share.public_key;
                Ok((
                    RoundOutput::Keygen {
                        msg: server_msg,
                        public_key,
                    },
                    Some(VaultWrite::Ecdsa(session.wallet_id.clone(), share)),
                ))
            }

            (ApiName::Triples, RoundPayload::Triples, RoundState::Idle) => {
                let deal = ecdsa::deal_triples(&mut OsRng);
                ecdsa::verify_triple_entity(&deal.p1, &deal.public, ecdsa::Party::P1)?;
                session.round = RoundState::TriplesDealt {
                    entity: deal.p1,
                    public: deal.public.clone(),
                };
                Ok((
                    RoundOutput::Triples {
                        entity: deal.p0,
                        public: deal.public,
                    },
                    None,
                ))
            }

            (
                ApiName::Presign,
                RoundPayload::Presign { msg },
                RoundState::TriplesDealt { entity, .. },
            ) => {
                let key_share = self
                    .vault
                    .ecdsa_share(&session.wallet_id)
                    .ok_or_else(|| no_key_material(&session.wallet_id))?;
                let (state, server_msg) = ecdsa::presign_round1(
                    session.session_id,
                    ecdsa::Party::P1,
                    &key_share,
                    entity,
                );
                let output = ecdsa::presign_finish(state, &msg)?;
                session.round = RoundState::Presigned { output };
                Ok((RoundOutput::Presign { msg: server_msg }, None))
            }

            (
                ApiName::Sign,
                RoundPayload::Sign { digest, msg },
                RoundState::Presigned { output },
            ) => {
                let key_share = self
                    .vault
                    .ecdsa_share(&session.wallet_id)
                    .ok_or_else(|| no_key_material(&session.wallet_id))?;
                let (state, server_msg) = ecdsa::sign_round1(&output, ecdsa::Party::P1, &digest);
                let signature = ecdsa::sign_finish(state, &msg, &key_share.public_key)?;
                // Presignature spent regardless of what the operation does
                // next; the round material does not survive the sign.
                session.round = RoundState::Idle;
                Ok((
                    RoundOutput::Sign {
                        msg: server_msg,
                        signature,
                    },
                    None,
                ))
            }

            (
                ApiName::Reshare,
                RoundPayload::Reshare {
                    shares,
                    threshold,
                    new_count,
                    new_threshold,
                },
                round,
            ) => {
                if !session.authenticated {
                    return Err(Error::ProtocolViolation(
                        "Reshare requires a completed signin round".into(),
                    ));
                }
                let secret = shamir::assemble(&shares, threshold)?;
                let fresh = shamir::split(&secret, new_count, new_threshold, &mut OsRng)?;
                session.round = round;
                Ok((RoundOutput::Reshared { shares: fresh }, None))
            }

            (ApiName::EddsaKeygen, RoundPayload::EddsaKeygen, RoundState::Idle) => {
                let keys = eddsa::keygen(&mut OsRng)?;
                session.round = RoundState::EddsaKeyed;
                Ok((
                    RoundOutput::EddsaKeygen {
                        client_key_package: keys.client_key_package,
                        public_key_package: keys.public_key_package.clone(),
                        verifying_key: keys.verifying_key,
                    },
                    Some(VaultWrite::Eddsa(
                        session.wallet_id.clone(),
                        EddsaServerKey {
                            key_package: keys.server_key_package,
                            public_key_package: keys.public_key_package,
                            verifying_key: keys.verifying_key,
                        },
                    )),
                ))
            }

            (
                ApiName::EddsaRound1,
                RoundPayload::EddsaRound1 {
                    participant,
                    client_commitments,
                },
                RoundState::EddsaKeyed,
            ) => {
                require_client_participant(&participant)?;
                let key = self
                    .vault
                    .eddsa_key(&session.wallet_id)
                    .ok_or_else(|| no_key_material(&session.wallet_id))?;
                let (server_nonces, server_commitments) =
                    eddsa::round1_commit(&key.key_package, &mut OsRng)?;
                session.round = RoundState::EddsaCommitted {
                    server_nonces,
                    client_commitments,
                    server_commitments: server_commitments.clone(),
                };
                Ok((RoundOutput::EddsaRound1 { server_commitments }, None))
            }

            (
                ApiName::EddsaRound2,
                RoundPayload::EddsaRound2 {
                    participant,
                    message,
                    client_signature_share,
                },
                RoundState::EddsaCommitted {
                    server_nonces,
                    client_commitments,
                    server_commitments,
                },
            ) => {
                require_client_participant(&participant)?;
                let key = self
                    .vault
                    .eddsa_key(&session.wallet_id)
                    .ok_or_else(|| no_key_material(&session.wallet_id))?;
                let server_share = eddsa::round2_sign(
                    &key.key_package,
                    &server_nonces,
                    &client_commitments,
                    &server_commitments,
                    &message,
                )?;
                let signature = eddsa::combine(
                    &message,
                    &client_commitments,
                    &server_commitments,
                    &client_signature_share,
                    &server_share,
                    &key.public_key_package,
                )?;
                Ok((
                    RoundOutput::EddsaRound2 {
                        signature: signature.to_vec(),
                    },
                    None,
                ))
            }

            (api, _, _) => Err(Error::ProtocolViolation(format!(
                "API {api:?} called out of order or with a mismatched payload"
            ))),
        }
    }
}

fn no_key_material(wallet_id: &str) -> Error {
    Error::ProtocolViolation(format!("No key material for wallet {wallet_id}"))
}

/// EdDSA round submissions must carry the client's wire identifier
fn require_client_participant(bytes: &[u8; 32]) -> Result<()> {
    if eddsa::participant_id(bytes)? != eddsa::client_identifier() {
        return Err(Error::ProtocolViolation(
            "EdDSA round message must come from the client participant".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn machine() -> SessionMachine<MemoryStore> {
        SessionMachine::new(MemoryStore::new())
    }

    const IDENTITY: &str = "user-1";
    const WALLET: &str = "wallet-1";

    async fn open(
        machine: &SessionMachine<MemoryStore>,
        op: OperationType,
    ) -> Session {
        machine
            .create(op, WALLET.into(), IDENTITY.into())
            .await
            .unwrap()
    }

    /// Drive the client half of ECDSA keygen through a sign_up session.
    async fn run_keygen(machine: &SessionMachine<MemoryStore>) -> EcdsaKeyShare {
        let session = open(machine, OperationType::SignUp).await;
        let (state, client_msg) =
            ecdsa::keygen_round1(session.session_id, ecdsa::Party::P0, &mut OsRng);

        let output = machine
            .advance(
                &session.session_id,
                IDENTITY,
                WALLET,
                ApiName::Keygen,
                RoundPayload::Keygen { msg: client_msg },
            )
            .await
            .unwrap();

        let RoundOutput::Keygen { msg, public_key } = output else {
            panic!("expected keygen output");
        };
        let client_share = ecdsa::keygen_finish(state, &msg).unwrap();
        assert_eq!(client_share.public_key, public_key);

        let stored = machine
            .get(&session.session_id, IDENTITY, WALLET)
            .await
            .unwrap();
        assert_eq!(stored.state, SessionState::Completed);
        client_share
    }

    fn client_wire_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 1;
        id
    }

    fn signin_payload(threshold: usize, count: usize) -> RoundPayload {
        let secret: [u8; 32] = curve25519_dalek::scalar::Scalar::random(&mut OsRng).to_bytes();
        let shares = shamir::split(&secret, count, threshold, &mut OsRng).unwrap();
        RoundPayload::SignIn { shares, threshold }
    }

    #[tokio::test]
    async fn sign_up_completes_on_keygen_and_refuses_more() {
        let machine = machine();
        run_keygen(&machine).await;

        let session = open(&machine, OperationType::SignUp).await;
        machine
            .advance(
                &session.session_id,
                IDENTITY,
                WALLET,
                ApiName::Keygen,
                RoundPayload::Keygen {
                    msg: ecdsa::keygen_round1(session.session_id, ecdsa::Party::P0, &mut OsRng).1,
                },
            )
            .await
            .unwrap();

        // Completed sessions admit no further rounds.
        let err = machine
            .advance(
                &session.session_id,
                IDENTITY,
                WALLET,
                ApiName::Keygen,
                RoundPayload::Keygen {
                    msg: ecdsa::keygen_round1(session.session_id, ecdsa::Party::P0, &mut OsRng).1,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionTerminal));
    }

    #[tokio::test]
    async fn full_sign_in_flow_produces_matching_signatures() {
        let machine = machine();
        let client_key = run_keygen(&machine).await;

        let session = open(&machine, OperationType::SignIn).await;
        let id = session.session_id;

        let out = machine
            .advance(&id, IDENTITY, WALLET, ApiName::SignIn, signin_payload(2, 3))
            .await
            .unwrap();
        assert!(matches!(out, RoundOutput::SignedIn));

        let RoundOutput::Triples { entity, public } = machine
            .advance(&id, IDENTITY, WALLET, ApiName::Triples, RoundPayload::Triples)
            .await
            .unwrap()
        else {
            panic!("expected triples output");
        };
        ecdsa::verify_triple_entity(&entity, &public, ecdsa::Party::P0).unwrap();

        let (pre_state, client_pre_msg) =
            ecdsa::presign_round1(id, ecdsa::Party::P0, &client_key, entity);
        let RoundOutput::Presign { msg: server_pre_msg } = machine
            .advance(
                &id,
                IDENTITY,
                WALLET,
                ApiName::Presign,
                RoundPayload::Presign { msg: client_pre_msg },
            )
            .await
            .unwrap()
        else {
            panic!("expected presign output");
        };
        let client_presign = ecdsa::presign_finish(pre_state, &server_pre_msg).unwrap();

        let digest: [u8; 32] = rand::random();
        let (sign_state, client_sign_msg) =
            ecdsa::sign_round1(&client_presign, ecdsa::Party::P0, &digest);
        let RoundOutput::Sign {
            msg: server_sign_msg,
            signature: server_sig,
        } = machine
            .advance(
                &id,
                IDENTITY,
                WALLET,
                ApiName::Sign,
                RoundPayload::Sign {
                    digest,
                    msg: client_sign_msg,
                },
            )
            .await
            .unwrap()
        else {
            panic!("expected sign output");
        };
        let client_sig =
            ecdsa::sign_finish(sign_state, &server_sign_msg, &client_key.public_key).unwrap();

        assert_eq!(client_sig.s, server_sig.s);
        assert_eq!(client_sig.big_r, server_sig.big_r);

        let stored = machine.get(&id, IDENTITY, WALLET).await.unwrap();
        assert_eq!(stored.state, SessionState::Completed);
    }

    #[tokio::test]
    async fn reshare_before_signin_fails_the_session() {
        let machine = machine();
        let session = open(&machine, OperationType::SignInReshare).await;

        let RoundPayload::SignIn { shares, threshold } = signin_payload(2, 3) else {
            unreachable!()
        };
        let err = machine
            .advance(
                &session.session_id,
                IDENTITY,
                WALLET,
                ApiName::Reshare,
                RoundPayload::Reshare {
                    shares,
                    threshold,
                    new_count: 3,
                    new_threshold: 2,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));

        let stored = machine
            .get(&session.session_id, IDENTITY, WALLET)
            .await
            .unwrap();
        assert_eq!(stored.state, SessionState::Failed);
    }

    #[tokio::test]
    async fn reshare_after_signin_completes_with_fresh_shares() {
        let machine = machine();
        let session = open(&machine, OperationType::SignInReshare).await;
        let id = session.session_id;

        let secret: [u8; 32] = curve25519_dalek::scalar::Scalar::random(&mut OsRng).to_bytes();
        let shares = shamir::split(&secret, 3, 2, &mut OsRng).unwrap();

        machine
            .advance(
                &id,
                IDENTITY,
                WALLET,
                ApiName::SignIn,
                RoundPayload::SignIn {
                    shares: shares.clone(),
                    threshold: 2,
                },
            )
            .await
            .unwrap();

        let RoundOutput::Reshared { shares: fresh } = machine
            .advance(
                &id,
                IDENTITY,
                WALLET,
                ApiName::Reshare,
                RoundPayload::Reshare {
                    shares,
                    threshold: 2,
                    new_count: 5,
                    new_threshold: 3,
                },
            )
            .await
            .unwrap()
        else {
            panic!("expected reshare output");
        };

        // Fresh shares reconstruct the same secret.
        assert_eq!(fresh.len(), 5);
        let recovered = shamir::assemble(&fresh[1..4], 3).unwrap();
        assert_eq!(*recovered, secret);

        let stored = machine.get(&id, IDENTITY, WALLET).await.unwrap();
        assert_eq!(stored.state, SessionState::Completed);
    }

    #[tokio::test]
    async fn add_ed25519_flow_produces_verifying_signature() {
        let machine = machine();
        let session = open(&machine, OperationType::AddEd25519).await;
        let id = session.session_id;

        let RoundOutput::EddsaKeygen {
            client_key_package,
            verifying_key,
            ..
        } = machine
            .advance(
                &id,
                IDENTITY,
                WALLET,
                ApiName::EddsaKeygen,
                RoundPayload::EddsaKeygen,
            )
            .await
            .unwrap()
        else {
            panic!("expected eddsa keygen output");
        };

        let (client_nonces, client_commitments) =
            eddsa::round1_commit(&client_key_package, &mut OsRng).unwrap();
        let RoundOutput::EddsaRound1 { server_commitments } = machine
            .advance(
                &id,
                IDENTITY,
                WALLET,
                ApiName::EddsaRound1,
                RoundPayload::EddsaRound1 {
                    participant: client_wire_id(),
                    client_commitments: client_commitments.clone(),
                },
            )
            .await
            .unwrap()
        else {
            panic!("expected eddsa round1 output");
        };

        let message = b"register ed25519 key".to_vec();
        let client_share = eddsa::round2_sign(
            &client_key_package,
            &client_nonces,
            &client_commitments,
            &server_commitments,
            &message,
        )
        .unwrap();

        let RoundOutput::EddsaRound2 { signature } = machine
            .advance(
                &id,
                IDENTITY,
                WALLET,
                ApiName::EddsaRound2,
                RoundPayload::EddsaRound2 {
                    participant: client_wire_id(),
                    message: message.clone(),
                    client_signature_share: client_share,
                },
            )
            .await
            .unwrap()
        else {
            panic!("expected eddsa round2 output");
        };

        let signature: [u8; 64] = signature.try_into().unwrap();
        eddsa::verify(&message, &verifying_key, &signature).unwrap();

        let stored = machine.get(&id, IDENTITY, WALLET).await.unwrap();
        assert_eq!(stored.state, SessionState::Completed);
    }

    #[tokio::test]
    async fn eddsa_round_from_wrong_participant_fails_the_session() {
        let machine = machine();
        let session = open(&machine, OperationType::AddEd25519).await;
        machine
            .advance(
                &session.session_id,
                IDENTITY,
                WALLET,
                ApiName::EddsaKeygen,
                RoundPayload::EddsaKeygen,
            )
            .await
            .unwrap();

        // The server's own identifier is a valid participant but not a
        // valid round submitter.
        let mut server_id = [0u8; 32];
        server_id[0] = 2;
        let err = machine
            .advance(
                &session.session_id,
                IDENTITY,
                WALLET,
                ApiName::EddsaRound1,
                RoundPayload::EddsaRound1 {
                    participant: server_id,
                    client_commitments: Vec::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));

        let stored = machine
            .get(&session.session_id, IDENTITY, WALLET)
            .await
            .unwrap();
        assert_eq!(stored.state, SessionState::Failed);
    }

    /// Store double that loses every publish race
    struct RejectingStore(MemoryStore);

    #[async_trait::async_trait]
    impl crate::store::SessionStore for RejectingStore {
        async fn get(&self, session_id: &SessionId) -> crate::Result<Option<Session>> {
            self.0.get(session_id).await
        }

        async fn put(&self, session: Session) -> crate::Result<()> {
            self.0.put(session).await
        }

        async fn compare_and_swap(&self, _: u64, _: Session) -> crate::Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn losing_the_write_race_leaves_the_vault_untouched() {
        let machine = SessionMachine::new(RejectingStore(MemoryStore::new()));
        let session = machine
            .create(OperationType::SignUp, WALLET.into(), IDENTITY.into())
            .await
            .unwrap();

        let err = machine
            .advance(
                &session.session_id,
                IDENTITY,
                WALLET,
                ApiName::Keygen,
                RoundPayload::Keygen {
                    msg: ecdsa::keygen_round1(session.session_id, ecdsa::Party::P0, &mut OsRng).1,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));

        // The losing round must not have published key material.
        assert!(machine.vault().ecdsa_share(WALLET).is_none());
    }

    #[tokio::test]
    async fn disallowed_api_fails_the_session() {
        let machine = machine();
        let session = open(&machine, OperationType::SignUp).await;

        let err = machine
            .advance(
                &session.session_id,
                IDENTITY,
                WALLET,
                ApiName::Triples,
                RoundPayload::Triples,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));

        let stored = machine
            .get(&session.session_id, IDENTITY, WALLET)
            .await
            .unwrap();
        assert_eq!(stored.state, SessionState::Failed);
    }

    #[tokio::test]
    async fn presign_without_triples_fails_the_session() {
        let machine = machine();
        let client_key = run_keygen(&machine).await;

        let session = open(&machine, OperationType::SignIn).await;
        let deal = ecdsa::deal_triples(&mut OsRng);
        let (_, msg) =
            ecdsa::presign_round1(session.session_id, ecdsa::Party::P0, &client_key, deal.p0);

        let err = machine
            .advance(
                &session.session_id,
                IDENTITY,
                WALLET,
                ApiName::Presign,
                RoundPayload::Presign { msg },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn ownership_mismatch_never_mutates() {
        let machine = machine();
        let session = open(&machine, OperationType::SignIn).await;

        let err = machine
            .advance(
                &session.session_id,
                "someone-else",
                WALLET,
                ApiName::SignIn,
                signin_payload(2, 3),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OwnershipMismatch));

        let stored = machine
            .get(&session.session_id, IDENTITY, WALLET)
            .await
            .unwrap();
        assert_eq!(stored.version, session.version);
        assert_eq!(stored.state, SessionState::Created);
    }

    #[tokio::test]
    async fn concurrent_advances_have_exactly_one_winner() {
        let machine = machine();
        let session = open(&machine, OperationType::SignIn).await;
        let id = session.session_id;

        let (a, b) = tokio::join!(
            machine.advance(&id, IDENTITY, WALLET, ApiName::Triples, RoundPayload::Triples),
            machine.advance(&id, IDENTITY, WALLET, ApiName::Triples, RoundPayload::Triples),
        );
        assert_eq!(
            [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
            1,
            "exactly one concurrent advance may win"
        );
    }

    #[tokio::test]
    async fn abort_is_idempotent_and_final() {
        let machine = machine();
        let session = open(&machine, OperationType::SignIn).await;
        let id = session.session_id;

        machine.abort(&id, IDENTITY, WALLET).await.unwrap();
        // Repeat abort is a no-op, not an error.
        machine.abort(&id, IDENTITY, WALLET).await.unwrap();

        let err = machine
            .advance(&id, IDENTITY, WALLET, ApiName::SignIn, signin_payload(2, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionTerminal));
    }

    #[tokio::test]
    async fn abort_after_completion_is_rejected() {
        let machine = machine();
        let session = open(&machine, OperationType::SignUp).await;
        machine
            .advance(
                &session.session_id,
                IDENTITY,
                WALLET,
                ApiName::Keygen,
                RoundPayload::Keygen {
                    msg: ecdsa::keygen_round1(session.session_id, ecdsa::Party::P0, &mut OsRng).1,
                },
            )
            .await
            .unwrap();

        let err = machine
            .abort(&session.session_id, IDENTITY, WALLET)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionTerminal));
    }

    #[tokio::test]
    async fn expired_session_aborts_on_touch() {
        let machine = machine();
        let session = open(&machine, OperationType::SignIn).await;
        let id = session.session_id;

        let mut stale = session.clone();
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        machine.store.put(stale).await.unwrap();

        let err = machine
            .advance(&id, IDENTITY, WALLET, ApiName::SignIn, signin_payload(2, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Expired));

        let stored = machine.get(&id, IDENTITY, WALLET).await.unwrap();
        assert_eq!(stored.state, SessionState::Aborted);
    }

    #[tokio::test]
    async fn unknown_session_reports_not_found() {
        let machine = machine();
        let err = machine
            .advance(
                &SessionId::new_v4(),
                IDENTITY,
                WALLET,
                ApiName::Triples,
                RoundPayload::Triples,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }
}

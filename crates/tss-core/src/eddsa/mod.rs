//! Two-party threshold-EdDSA engine (FROST, Ed25519)
//!
//! Fixed 2-of-2 configuration: P0 is the client (identifier 1), P1 the
//! server (identifier 2). The engine operates on the raw byte encodings of
//! `frost-ed25519` packages; text-safe encoding belongs to the wire
//! adapter.
//!
//! Combining rule: the server (P1) aggregates. Round 2's request already
//! carries the client's signature share, so the server can aggregate both
//! shares, verify the result against the group key, and release only a
//! verified final signature.

use std::collections::BTreeMap;

use frost_ed25519 as frost;
use rand_core::{CryptoRng, RngCore};
use tracing::{debug, instrument};

use crate::{Error, Result};

/// Client participant identifier (P0)
pub const CLIENT_ID: u16 = 1;
/// Server participant identifier (P1)
pub const SERVER_ID: u16 = 2;

/// Output of the out-of-band two-party key generation.
///
/// Each key package is exclusively owned by its party; only the public-key
/// package and verifying key are shared.
pub struct KeygenOutput {
    pub client_key_package: Vec<u8>,
    pub server_key_package: Vec<u8>,
    pub public_key_package: Vec<u8>,
    pub verifying_key: [u8; 32],
}

fn identifier(id: u16) -> frost::Identifier {
    id.try_into().expect("nonzero identifier")
}

/// FROST identifier of the client participant
pub fn client_identifier() -> frost::Identifier {
    identifier(CLIENT_ID)
}

/// Parse a 32-byte wire identifier.
///
/// Identifiers are little-endian scalars whose only significant byte is 1
/// or 2; anything else is a protocol violation, never a guess.
pub fn participant_id(bytes: &[u8; 32]) -> Result<frost::Identifier> {
    if bytes[1..].iter().any(|b| *b != 0) || !matches!(bytes[0], 1 | 2) {
        return Err(Error::ProtocolViolation(
            "Participant identifier must be 1 or 2".into(),
        ));
    }
    Ok(identifier(bytes[0] as u16))
}

fn violation<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> Error + '_ {
    move |e| Error::ProtocolViolation(format!("{context}: {e}"))
}

fn internal<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> Error + '_ {
    move |e| Error::Crypto(format!("{context}: {e}"))
}

/// Dealer-style 2-of-2 key generation
#[instrument(skip(rng))]
pub fn keygen<R: CryptoRng + RngCore>(rng: &mut R) -> Result<KeygenOutput> {
    let ids = [identifier(CLIENT_ID), identifier(SERVER_ID)];
    let (shares, public_key_package) = frost::keys::generate_with_dealer(
        2,
        2,
        frost::keys::IdentifierList::Custom(&ids),
        rng,
    )
    .map_err(internal("Keygen failed"))?;

    let mut packages = BTreeMap::new();
    for (id, share) in shares {
        let key_package =
            frost::keys::KeyPackage::try_from(share).map_err(internal("Invalid dealt share"))?;
        packages.insert(
            id,
            key_package
                .serialize()
                .map_err(internal("Key package serialization"))?,
        );
    }

    let verifying_key: [u8; 32] = public_key_package
        .verifying_key()
        .serialize()
        .map_err(internal("Verifying key serialization"))?
        .try_into()
        .map_err(|_| Error::Crypto("Verifying key length".into()))?;

    debug!(public_key = hex::encode(verifying_key), "EdDSA keygen complete");

    Ok(KeygenOutput {
        client_key_package: packages
            .remove(&identifier(CLIENT_ID))
            .ok_or_else(|| Error::Crypto("Missing client share".into()))?,
        server_key_package: packages
            .remove(&identifier(SERVER_ID))
            .ok_or_else(|| Error::Crypto("Missing server share".into()))?,
        public_key_package: public_key_package
            .serialize()
            .map_err(internal("Public key package serialization"))?,
        verifying_key,
    })
}

/// Round 1: produce secret nonces and the public commitment
pub fn round1_commit<R: CryptoRng + RngCore>(
    key_package: &[u8],
    rng: &mut R,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let key_package = frost::keys::KeyPackage::deserialize(key_package)
        .map_err(violation("Invalid key package"))?;
    let (nonces, commitments) = frost::round1::commit(key_package.signing_share(), rng);

    Ok((
        nonces
            .serialize()
            .map_err(internal("Nonce serialization"))?,
        commitments
            .serialize()
            .map_err(internal("Commitment serialization"))?,
    ))
}

fn signing_package(
    client_commitments: &[u8],
    server_commitments: &[u8],
    message: &[u8],
) -> Result<frost::SigningPackage> {
    let client = frost::round1::SigningCommitments::deserialize(client_commitments)
        .map_err(violation("Invalid client commitments"))?;
    let server = frost::round1::SigningCommitments::deserialize(server_commitments)
        .map_err(violation("Invalid server commitments"))?;

    let mut commitments = BTreeMap::new();
    commitments.insert(identifier(CLIENT_ID), client);
    commitments.insert(identifier(SERVER_ID), server);
    Ok(frost::SigningPackage::new(commitments, message))
}

/// Round 2: produce this party's signature share over `message`
pub fn round2_sign(
    key_package: &[u8],
    nonces: &[u8],
    client_commitments: &[u8],
    server_commitments: &[u8],
    message: &[u8],
) -> Result<Vec<u8>> {
    let key_package = frost::keys::KeyPackage::deserialize(key_package)
        .map_err(violation("Invalid key package"))?;
    let nonces = frost::round1::SigningNonces::deserialize(nonces)
        .map_err(violation("Invalid signing nonces"))?;
    let package = signing_package(client_commitments, server_commitments, message)?;

    let share = frost::round2::sign(&package, &nonces, &key_package)
        .map_err(violation("Round 2 sign failed"))?;
    Ok(share.serialize())
}

/// Combine both signature shares into the final, verified signature.
///
/// Fixed protocol rule: only the server side runs this.
pub fn combine(
    message: &[u8],
    client_commitments: &[u8],
    server_commitments: &[u8],
    client_share: &[u8],
    server_share: &[u8],
    public_key_package: &[u8],
) -> Result<[u8; 64]> {
    let package = signing_package(client_commitments, server_commitments, message)?;
    let public_key_package = frost::keys::PublicKeyPackage::deserialize(public_key_package)
        .map_err(violation("Invalid public key package"))?;

    let mut shares = BTreeMap::new();
    shares.insert(
        identifier(CLIENT_ID),
        frost::round2::SignatureShare::deserialize(client_share)
            .map_err(violation("Invalid client signature share"))?,
    );
    shares.insert(
        identifier(SERVER_ID),
        frost::round2::SignatureShare::deserialize(server_share)
            .map_err(violation("Invalid server signature share"))?,
    );

    let signature = frost::aggregate(&package, &shares, &public_key_package)
        .map_err(violation("Aggregation failed"))?;

    // aggregate() already verifies; keep the explicit check so a future
    // ciphersuite bump cannot silently drop it.
    public_key_package
        .verifying_key()
        .verify(message, &signature)
        .map_err(violation("Combined signature failed verification"))?;

    signature
        .serialize()
        .map_err(internal("Signature serialization"))?
        .try_into()
        .map_err(|_| Error::Crypto("Signature length".into()))
}

/// Verify a final signature against the 32-byte group verifying key
pub fn verify(message: &[u8], verifying_key: &[u8; 32], signature: &[u8; 64]) -> Result<()> {
    let key = frost::VerifyingKey::deserialize(verifying_key)
        .map_err(violation("Invalid verifying key"))?;
    let signature = frost::Signature::deserialize(signature)
        .map_err(violation("Invalid signature encoding"))?;
    key.verify(message, &signature)
        .map_err(|_| Error::AuthenticationFailed)
}

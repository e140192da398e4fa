//! Two-party threshold-ECDSA engine (secp256k1)
//!
//! Round structure: correlated-randomness triples, then a single-barrier
//! presignature, then the sign round. Every round is an explicit
//! state-machine step — a pure function from the local state and the
//! counterpart's message to the next state or a typed error. Messages carry
//! the session identifier and sender; any mismatch hard-fails with
//! [`ProtocolViolation`](crate::Error::ProtocolViolation) instead of being
//! buffered.
//!
//! The key is additively shared between P0 (client) and P1 (server); the
//! nonce `k` is triple0's `a` component, so `k⁻¹` and `k⁻¹·x` shares fall
//! out of two Beaver openings without any further exchange.

mod keygen;
mod messages;
mod presign;
mod sign;
mod triples;

pub use keygen::{keygen_round1, keygen_finish, KeygenState};
pub use messages::{KeygenMsg1, PresignMsg1, SignMsg1};
pub use presign::{presign_round1, presign_finish, PresignOutput, PresignState};
pub use sign::{sign_round1, sign_finish, SignState};
pub use triples::{
    deal_triples, verify_triple_entity, TripleCommitments, TripleDeal, TripleEntity,
    TriplePublic, TripleShare,
};

use k256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
    },
    AffinePoint, ProjectivePoint, Scalar,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::{point_serde, scalar_serde};
use crate::{Error, Result};

/// The two fixed protocol roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Party {
    /// Client side
    P0,
    /// Server side
    P1,
}

impl Party {
    /// The other role
    pub fn counterpart(self) -> Party {
        match self {
            Party::P0 => Party::P1,
            Party::P1 => Party::P0,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Party::P0 => 0,
            Party::P1 => 1,
        }
    }
}

/// Key share held by one party after keygen.
///
/// Exclusively owned by its generating party; the combined secret never
/// exists anywhere.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct EcdsaKeyShare {
    /// This party's role
    #[zeroize(skip)]
    pub party: Party,

    /// Additive secret share x_i
    #[zeroize(skip)]
    #[serde(with = "scalar_serde")]
    pub secret_share: Scalar,

    /// Group public key X = X0 + X1 (SEC1 compressed)
    #[zeroize(skip)]
    #[serde(with = "point_serde")]
    pub public_key: [u8; 33],

    /// Both parties' public shares, indexed by party
    #[zeroize(skip)]
    pub public_shares: Vec<Vec<u8>>,
}

impl EcdsaKeyShare {
    /// Key identifier: the hex-encoded group public key
    pub fn key_id(&self) -> String {
        hex::encode(self.public_key)
    }
}

// The secret share never appears in the Debug form.
impl fmt::Debug for EcdsaKeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcdsaKeyShare")
            .field("party", &self.party)
            .field("public_key", &hex::encode(self.public_key))
            .finish_non_exhaustive()
    }
}

/// Encode a point in SEC1 compressed form
pub(crate) fn encode_point(point: &ProjectivePoint) -> Result<[u8; 33]> {
    let encoded = point.to_affine().to_encoded_point(true);
    encoded
        .as_bytes()
        .try_into()
        .map_err(|_| Error::Crypto("Point encodes to identity".into()))
}

/// Decode a SEC1 compressed point
pub fn decode_point(bytes: &[u8; 33]) -> Result<ProjectivePoint> {
    let encoded = k256::EncodedPoint::from_bytes(bytes)
        .map_err(|e| Error::ProtocolViolation(format!("Invalid point encoding: {e}")))?;
    let affine_opt = AffinePoint::from_encoded_point(&encoded);
    let affine: AffinePoint = Option::<AffinePoint>::from(affine_opt)
        .ok_or_else(|| Error::ProtocolViolation("Point not on curve".into()))?;
    Ok(ProjectivePoint::from(affine))
}

/// x-coordinate of a point reduced into the scalar field
pub fn x_coordinate(point: &ProjectivePoint) -> Scalar {
    let encoded = point.to_affine().to_encoded_point(false);
    let x: [u8; 32] = encoded.as_bytes()[1..33]
        .try_into()
        .expect("uncompressed SEC1 layout");
    <Scalar as Reduce<U256>>::reduce_bytes(&x.into())
}

/// Session/sender guard shared by all round-finish steps
pub(crate) fn check_counterpart(
    expected_session: &crate::types::SessionId,
    expected_from: Party,
    session_id: &crate::types::SessionId,
    from: Party,
) -> Result<()> {
    if session_id != expected_session {
        return Err(Error::ProtocolViolation(format!(
            "Message for session {session_id} received in session {expected_session}"
        )));
    }
    if from != expected_from {
        return Err(Error::ProtocolViolation(format!(
            "Expected message from {expected_from:?}, got {from:?}"
        )));
    }
    Ok(())
}

//! Final sign round
//!
//! Spends a presignature against a 32-byte message digest. The combined `s`
//! is normalized to the curve's low half and the raw `(big_r, s, is_high)`
//! tuple is returned; recovery-id derivation is boundary logic and lives
//! outside the engine.

use k256::{
    elliptic_curve::{bigint::U256, ops::Reduce, scalar::IsHigh},
    ProjectivePoint, Scalar,
};
use tracing::{debug, instrument};

use super::{check_counterpart, decode_point, x_coordinate, Party, PresignOutput, SignMsg1};
use crate::types::{EcdsaSignature, SessionId};
use crate::{Error, Result};

/// Local state between sign round 1 and finish
pub struct SignState {
    session_id: SessionId,
    party: Party,
    big_r: [u8; 33],
    r: Scalar,
    digest: Scalar,
    my_share: Scalar,
}

/// Produce this party's signature share for `digest`
#[instrument(skip(presign, digest))]
pub fn sign_round1(
    presign: &PresignOutput,
    party: Party,
    digest: &[u8; 32],
) -> (SignState, SignMsg1) {
    let m = <Scalar as Reduce<U256>>::reduce_bytes(&(*digest).into());
    let s_share = presign.k_inv_share * m + presign.r * presign.chi_share;

    let my_msg = SignMsg1 {
        session_id: presign.session_id,
        from: party,
        s_share,
    };

    debug!(session_id = %presign.session_id, ?party, "Sign round 1 complete");
    (
        SignState {
            session_id: presign.session_id,
            party,
            big_r: presign.big_r,
            r: presign.r,
            digest: m,
            my_share: s_share,
        },
        my_msg,
    )
}

/// Combine both signature shares and verify against the group key
pub fn sign_finish(
    state: SignState,
    incoming: &SignMsg1,
    public_key: &[u8; 33],
) -> Result<EcdsaSignature> {
    check_counterpart(
        &state.session_id,
        state.party.counterpart(),
        &incoming.session_id,
        incoming.from,
    )?;

    let mut s = state.my_share + incoming.s_share;
    if s == Scalar::ZERO {
        return Err(Error::ProtocolViolation("Zero signature scalar".into()));
    }

    let is_high = bool::from(s.is_high());
    if is_high {
        s = -s;
    }

    // Standard ECDSA verification; a failure means a party contributed a
    // bad share and the whole session must restart.
    let s_inv = Option::<Scalar>::from(s.invert())
        .ok_or_else(|| Error::ProtocolViolation("Non-invertible signature scalar".into()))?;
    let u1 = state.digest * s_inv;
    let u2 = state.r * s_inv;
    let group_key = decode_point(public_key)?;
    let recovered = ProjectivePoint::GENERATOR * u1 + group_key * u2;
    if recovered == ProjectivePoint::IDENTITY || x_coordinate(&recovered) != state.r {
        return Err(Error::ProtocolViolation(
            "Combined signature failed verification".into(),
        ));
    }

    Ok(EcdsaSignature {
        big_r: state.big_r,
        s: s.to_bytes().into(),
        is_high,
    })
}

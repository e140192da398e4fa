//! Presignature round
//!
//! Computes additive shares of `k⁻¹` and `k⁻¹·x` across a single ordered
//! message barrier, where `k` is triple0's `a` component. The finish step
//! runs only once the counterpart's message for the same session is in
//! hand; it never buffers.
//!
//! Algebra: with triple0 = (a, b, c = a·b) the opening `w = c0 + c1` gives
//! `k⁻¹ = b·w⁻¹` sharewise. Triple1 Beaver-multiplies `b` by the key share
//! `x`, and dividing that product by `w` yields shares of `x/a = k⁻¹·x`.

use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    check_counterpart, decode_point, encode_point, x_coordinate, EcdsaKeyShare, Party,
    PresignMsg1, TripleEntity,
};
use crate::types::{point_serde, scalar_serde, SessionId};
use crate::{Error, Result};

/// Local state between presign round 1 and finish
pub struct PresignState {
    session_id: SessionId,
    party: Party,
    triples: TripleEntity,
    my_msg: PresignMsg1,
}

/// Per-party presignature, ready for an arbitrary digest.
///
/// Scoped to one session; spent by a single sign round and discarded.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PresignOutput {
    #[zeroize(skip)]
    pub session_id: SessionId,
    /// Combined nonce point R
    #[zeroize(skip)]
    #[serde(with = "point_serde")]
    pub big_r: [u8; 33],
    /// r = R.x reduced into the scalar field
    #[zeroize(skip)]
    #[serde(with = "scalar_serde")]
    pub r: Scalar,
    /// This party's additive share of k⁻¹
    #[zeroize(skip)]
    #[serde(with = "scalar_serde")]
    pub k_inv_share: Scalar,
    /// This party's additive share of k⁻¹·x
    #[zeroize(skip)]
    #[serde(with = "scalar_serde")]
    pub chi_share: Scalar,
}

// The k⁻¹ and k⁻¹·x shares stay out of the Debug form.
impl fmt::Debug for PresignOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresignOutput")
            .field("session_id", &self.session_id)
            .field("big_r", &hex::encode(self.big_r))
            .finish_non_exhaustive()
    }
}

/// Produce this party's presign message from its key share and triples.
///
/// Consumes the triple entity: the material is spent whether or not the
/// round completes.
#[instrument(skip(key_share, triples))]
pub fn presign_round1(
    session_id: SessionId,
    party: Party,
    key_share: &EcdsaKeyShare,
    triples: TripleEntity,
) -> (PresignState, PresignMsg1) {
    let big_r = encode_point(&(ProjectivePoint::GENERATOR * triples.triple0.a))
        .expect("nonce share is never the group order");

    let my_msg = PresignMsg1 {
        session_id,
        from: party,
        big_r,
        w_share: triples.triple0.c,
        e_share: triples.triple0.b - triples.triple1.a,
        f_share: key_share.secret_share - triples.triple1.b,
    };

    debug!(%session_id, ?party, "Presign round 1 complete");
    (
        PresignState {
            session_id,
            party,
            triples,
            my_msg: my_msg.clone(),
        },
        my_msg,
    )
}

/// Combine both presign messages into this party's presignature
pub fn presign_finish(state: PresignState, incoming: &PresignMsg1) -> Result<PresignOutput> {
    check_counterpart(
        &state.session_id,
        state.party.counterpart(),
        &incoming.session_id,
        incoming.from,
    )?;

    let my_r = decode_point(&state.my_msg.big_r)?;
    let their_r = decode_point(&incoming.big_r)?;
    let big_r_point = my_r + their_r;
    if big_r_point == ProjectivePoint::IDENTITY {
        return Err(Error::ProtocolViolation("Nonce point is the identity".into()));
    }
    let big_r = encode_point(&big_r_point)?;
    let r = x_coordinate(&big_r_point);
    if r == Scalar::ZERO {
        return Err(Error::ProtocolViolation("Zero r value".into()));
    }

    let w = state.my_msg.w_share + incoming.w_share;
    let w_inv = Option::<Scalar>::from(w.invert())
        .ok_or_else(|| Error::ProtocolViolation("Degenerate triple opening".into()))?;

    let e = state.my_msg.e_share + incoming.e_share;
    let f = state.my_msg.f_share + incoming.f_share;

    // Beaver product share of b·x, then divide the product by w = a·b.
    let t1 = &state.triples.triple1;
    let mut bx_share = t1.c + e * t1.b + f * t1.a;
    if state.party == Party::P0 {
        bx_share += e * f;
    }

    Ok(PresignOutput {
        session_id: state.session_id,
        big_r,
        r,
        k_inv_share: state.triples.triple0.b * w_inv,
        chi_share: bx_share * w_inv,
    })
}

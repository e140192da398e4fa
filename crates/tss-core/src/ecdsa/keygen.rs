//! Two-party additive key generation

use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand_core::{CryptoRng, RngCore};
use tracing::{debug, instrument};

use super::{check_counterpart, encode_point, EcdsaKeyShare, KeygenMsg1, Party};
use crate::types::SessionId;
use crate::Result;

/// Local state between keygen round 1 and finish
pub struct KeygenState {
    session_id: SessionId,
    party: Party,
    secret: Scalar,
    my_msg: KeygenMsg1,
}

/// Sample this party's key share and produce the public-share message
#[instrument(skip(rng))]
pub fn keygen_round1<R: CryptoRng + RngCore>(
    session_id: SessionId,
    party: Party,
    rng: &mut R,
) -> (KeygenState, KeygenMsg1) {
    let secret = Scalar::random(rng);
    let big_x = encode_point(&(ProjectivePoint::GENERATOR * secret))
        .expect("random share is never the group order");

    let my_msg = KeygenMsg1 {
        session_id,
        from: party,
        big_x,
    };

    debug!(%session_id, ?party, "Keygen round 1 complete");
    (
        KeygenState {
            session_id,
            party,
            secret,
            my_msg: my_msg.clone(),
        },
        my_msg,
    )
}

/// Combine both public shares into this party's key share
pub fn keygen_finish(state: KeygenState, incoming: &KeygenMsg1) -> Result<EcdsaKeyShare> {
    check_counterpart(
        &state.session_id,
        state.party.counterpart(),
        &incoming.session_id,
        incoming.from,
    )?;

    let theirs = super::decode_point(&incoming.big_x)?;
    let mine = ProjectivePoint::GENERATOR * state.secret;
    let public_key = encode_point(&(mine + theirs))?;

    let mut public_shares = vec![Vec::new(), Vec::new()];
    public_shares[state.party.index()] = state.my_msg.big_x.to_vec();
    public_shares[incoming.from.index()] = incoming.big_x.to_vec();

    Ok(EcdsaKeyShare {
        party: state.party,
        secret_share: state.secret,
        public_key,
        public_shares,
    })
}

//! Correlated-randomness triples
//!
//! Each session consumes two independent Beaver triples `(a, b, c = a·b)`,
//! additively shared between the parties. The dealer publishes per-party
//! commitments to every share component so each party can check the private
//! material it received for consistency before the presign round spends it.

use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{decode_point, encode_point, Party};
use crate::types::{point_serde, scalar_serde};
use crate::{Error, Result};

/// One party's additive shares of a single triple
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct TripleShare {
    #[zeroize(skip)]
    #[serde(with = "scalar_serde")]
    pub a: Scalar,
    #[zeroize(skip)]
    #[serde(with = "scalar_serde")]
    pub b: Scalar,
    #[zeroize(skip)]
    #[serde(with = "scalar_serde")]
    pub c: Scalar,
}

// Share components are secret; the Debug form names the type and nothing
// else.
impl fmt::Debug for TripleShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TripleShare").finish_non_exhaustive()
    }
}

/// One party's private triple material for a session: both triples.
///
/// Exclusively owned until presign consumes it; released on session abort,
/// failure, or expiry.
#[derive(Debug, Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct TripleEntity {
    pub triple0: TripleShare,
    pub triple1: TripleShare,
}

/// Commitments to one party's three share components of one triple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyCommitments {
    #[serde(with = "point_serde")]
    pub big_a: [u8; 33],
    #[serde(with = "point_serde")]
    pub big_b: [u8; 33],
    #[serde(with = "point_serde")]
    pub big_c: [u8; 33],
}

/// Both parties' commitments for one triple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripleCommitments {
    pub p0: PartyCommitments,
    pub p1: PartyCommitments,
}

impl TripleCommitments {
    fn for_party(&self, party: Party) -> &PartyCommitments {
        match party {
            Party::P0 => &self.p0,
            Party::P1 => &self.p1,
        }
    }
}

/// Public commitments for both triples of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriplePublic {
    pub triple0: TripleCommitments,
    pub triple1: TripleCommitments,
}

/// A full dealt pair: each party's private entity plus the public commitments
pub struct TripleDeal {
    pub p0: TripleEntity,
    pub p1: TripleEntity,
    pub public: TriplePublic,
}

fn share_scalar<R: CryptoRng + RngCore>(value: Scalar, rng: &mut R) -> (Scalar, Scalar) {
    let first = Scalar::random(rng);
    (first, value - first)
}

fn commit(share: &TripleShare) -> PartyCommitments {
    let point = |s: &Scalar| {
        encode_point(&(ProjectivePoint::GENERATOR * s)).expect("share commitments are non-identity")
    };
    PartyCommitments {
        big_a: point(&share.a),
        big_b: point(&share.b),
        big_c: point(&share.c),
    }
}

fn deal_one<R: CryptoRng + RngCore>(rng: &mut R) -> (TripleShare, TripleShare, TripleCommitments) {
    // Reborrow: Field::random takes its rng by value.
    let a = Scalar::random(&mut *rng);
    let b = Scalar::random(&mut *rng);
    let c = a * b;

    let (a0, a1) = share_scalar(a, rng);
    let (b0, b1) = share_scalar(b, rng);
    let (c0, c1) = share_scalar(c, rng);

    let s0 = TripleShare { a: a0, b: b0, c: c0 };
    let s1 = TripleShare { a: a1, b: b1, c: c1 };
    let commitments = TripleCommitments {
        p0: commit(&s0),
        p1: commit(&s1),
    };
    (s0, s1, commitments)
}

/// Deal the two independent triples a session needs
pub fn deal_triples<R: CryptoRng + RngCore>(rng: &mut R) -> TripleDeal {
    let (t0_p0, t0_p1, t0_commitments) = deal_one(rng);
    let (t1_p0, t1_p1, t1_commitments) = deal_one(rng);

    TripleDeal {
        p0: TripleEntity {
            triple0: t0_p0,
            triple1: t1_p0,
        },
        p1: TripleEntity {
            triple0: t0_p1,
            triple1: t1_p1,
        },
        public: TriplePublic {
            triple0: t0_commitments,
            triple1: t1_commitments,
        },
    }
}

fn verify_share(share: &TripleShare, commitments: &PartyCommitments) -> Result<()> {
    let checks = [
        (&share.a, &commitments.big_a),
        (&share.b, &commitments.big_b),
        (&share.c, &commitments.big_c),
    ];
    for (scalar, commitment) in checks {
        if ProjectivePoint::GENERATOR * scalar != decode_point(commitment)? {
            return Err(Error::ProtocolViolation(
                "Triple share does not match its commitment".into(),
            ));
        }
    }
    Ok(())
}

/// Check a party's private triple material against the public commitments
///
/// A mismatch means the dealt material is inconsistent and the session must
/// not proceed to presign.
pub fn verify_triple_entity(
    entity: &TripleEntity,
    public: &TriplePublic,
    party: Party,
) -> Result<()> {
    verify_share(&entity.triple0, public.triple0.for_party(party))?;
    verify_share(&entity.triple1, public.triple1.for_party(party))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn dealt_triples_are_consistent() {
        let deal = deal_triples(&mut OsRng);

        verify_triple_entity(&deal.p0, &deal.public, Party::P0).unwrap();
        verify_triple_entity(&deal.p1, &deal.public, Party::P1).unwrap();

        // Shares recombine to a real multiplication triple.
        for (s0, s1) in [
            (&deal.p0.triple0, &deal.p1.triple0),
            (&deal.p0.triple1, &deal.p1.triple1),
        ] {
            let a = s0.a + s1.a;
            let b = s0.b + s1.b;
            let c = s0.c + s1.c;
            assert_eq!(a * b, c);
        }
    }

    #[test]
    fn dealer_reuses_one_rng_across_deals() {
        let mut rng = OsRng;
        let first = deal_triples(&mut rng);
        let second = deal_triples(&mut rng);
        assert_ne!(
            first.public.triple0.p0.big_a,
            second.public.triple0.p0.big_a
        );
    }

    #[test]
    fn cross_party_material_fails_verification() {
        let deal = deal_triples(&mut OsRng);
        // P0's shares against P1's commitments.
        assert!(verify_triple_entity(&deal.p0, &deal.public, Party::P1).is_err());
    }
}

//! Secret share assembler
//!
//! Shamir reconstruction of a user secret from independently-held node
//! shares over the Ed25519 scalar field. Reconstruction fails closed: an
//! under-threshold set returns [`Error::InsufficientShares`] and never a
//! value, because interpolating too few points silently yields a wrong
//! secret.
//!
//! The assembled secret is transient by construction: it is returned inside
//! a [`Zeroizing`] wrapper and must never be persisted in combined form.

use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{Error, Result};

/// One Shamir share of a user secret, held by a single key-share node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeShare {
    /// Evaluation point, nonzero and unique per node
    pub x: Scalar,
    /// Polynomial value at `x`
    pub y: Scalar,
}

impl NodeShare {
    /// Build a share from raw 32-byte little-endian coordinates
    pub fn from_bytes(x: &[u8; 32], y: &[u8; 32]) -> Self {
        Self {
            x: Scalar::from_bytes_mod_order(*x),
            y: Scalar::from_bytes_mod_order(*y),
        }
    }
}

/// Split `secret` into `n` shares with reconstruction threshold `t`
pub fn split<R: CryptoRng + RngCore>(
    secret: &[u8; 32],
    n: usize,
    t: usize,
    rng: &mut R,
) -> Result<Vec<NodeShare>> {
    if t < 2 {
        return Err(Error::ProtocolViolation(
            "Reconstruction threshold must be at least 2".into(),
        ));
    }
    if t > n {
        return Err(Error::ProtocolViolation(format!(
            "Threshold {t} exceeds share count {n}"
        )));
    }

    // Degree t-1 polynomial with the secret as constant term.
    let mut coefficients = Vec::with_capacity(t);
    coefficients.push(Scalar::from_bytes_mod_order(*secret));
    for _ in 1..t {
        coefficients.push(Scalar::random(rng));
    }

    let shares = (1..=n as u64)
        .map(|i| {
            let x = Scalar::from(i);
            NodeShare {
                x,
                y: evaluate(&coefficients, &x),
            }
        })
        .collect();

    Ok(shares)
}

/// Horner evaluation; `coefficients[0]` is the constant term
fn evaluate(coefficients: &[Scalar], x: &Scalar) -> Scalar {
    coefficients
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient)
}

/// Reconstruct the secret from at least `threshold` distinct shares
///
/// Lagrange interpolation at `x = 0`. Given consistent shares the result is
/// independent of ordering and of which qualifying subset is supplied.
pub fn assemble(shares: &[NodeShare], threshold: usize) -> Result<Zeroizing<[u8; 32]>> {
    if threshold < 2 {
        return Err(Error::ProtocolViolation(
            "Reconstruction threshold must be at least 2".into(),
        ));
    }
    if shares.len() < threshold {
        return Err(Error::InsufficientShares {
            required: threshold,
            actual: shares.len(),
        });
    }
    for (i, share) in shares.iter().enumerate() {
        if share.x == Scalar::ZERO {
            return Err(Error::ProtocolViolation(
                "Share evaluation point must be nonzero".into(),
            ));
        }
        if shares[..i].iter().any(|other| other.x == share.x) {
            return Err(Error::ProtocolViolation(
                "Duplicate share evaluation point".into(),
            ));
        }
    }

    let mut secret = Scalar::ZERO;
    for (i, share) in shares.iter().enumerate() {
        let mut numerator = Scalar::ONE;
        let mut denominator = Scalar::ONE;
        for (j, other) in shares.iter().enumerate() {
            if i != j {
                numerator *= other.x;
                denominator *= other.x - share.x;
            }
        }
        // Denominator is nonzero: evaluation points are pairwise distinct.
        secret += share.y * numerator * denominator.invert();
    }

    Ok(Zeroizing::new(secret.to_bytes()))
}

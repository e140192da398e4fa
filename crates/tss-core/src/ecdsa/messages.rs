//! ECDSA round message types
//!
//! Every message names its session and sender so a receiving round can
//! reject cross-session or out-of-order traffic outright.

use k256::Scalar;
use serde::{Deserialize, Serialize};

use super::Party;
use crate::types::{point_serde, scalar_serde, SessionId};

/// Keygen round 1: public share of the additive key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeygenMsg1 {
    pub session_id: SessionId,
    pub from: Party,
    /// X_i = x_i·G (SEC1 compressed)
    #[serde(with = "point_serde")]
    pub big_x: [u8; 33],
}

/// Presign round 1: nonce point share plus the Beaver openings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignMsg1 {
    pub session_id: SessionId,
    pub from: Party,
    /// R_i = a_i·G, this party's share of the nonce point
    #[serde(with = "point_serde")]
    pub big_r: [u8; 33],
    /// Opening share of w = a·b (triple0's c component)
    #[serde(with = "scalar_serde")]
    pub w_share: Scalar,
    /// Opening share of e = b − a'
    #[serde(with = "scalar_serde")]
    pub e_share: Scalar,
    /// Opening share of f = x − b'
    #[serde(with = "scalar_serde")]
    pub f_share: Scalar,
}

/// Sign round 1: partial signature share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignMsg1 {
    pub session_id: SessionId,
    pub from: Party,
    /// s_i = k_inv_i·m + r·chi_i
    #[serde(with = "scalar_serde")]
    pub s_share: Scalar,
}

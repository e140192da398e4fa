//! Core types shared across the session machine and signing engines

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Unique identifier for a session
pub type SessionId = uuid::Uuid;

/// Wallet identifier
pub type WalletId = String;

/// Owner identity (opaque to the core; matched byte-for-byte)
pub type Identity = String;

/// Operation a session was opened for. Immutable for the session lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    SignIn,
    SignUp,
    /// Ordered composite: authenticate first, then reshare
    SignInReshare,
    AddEd25519,
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sign_in" => Ok(OperationType::SignIn),
            "sign_up" => Ok(OperationType::SignUp),
            "sign_in_reshare" => Ok(OperationType::SignInReshare),
            "add_ed25519" => Ok(OperationType::AddEd25519),
            other => Err(Error::ProtocolViolation(format!(
                "Unknown operation type: {other}"
            ))),
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationType::SignIn => "sign_in",
            OperationType::SignUp => "sign_up",
            OperationType::SignInReshare => "sign_in_reshare",
            OperationType::AddEd25519 => "add_ed25519",
        };
        f.write_str(s)
    }
}

/// Round-level API names a session may be advanced with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiName {
    SignIn,
    Keygen,
    Triples,
    Presign,
    Sign,
    Reshare,
    EddsaKeygen,
    EddsaRound1,
    EddsaRound2,
}

impl FromStr for ApiName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signin" => Ok(ApiName::SignIn),
            "keygen" => Ok(ApiName::Keygen),
            "triples" => Ok(ApiName::Triples),
            "presign" => Ok(ApiName::Presign),
            "sign" => Ok(ApiName::Sign),
            "reshare" => Ok(ApiName::Reshare),
            "eddsa_keygen" => Ok(ApiName::EddsaKeygen),
            "eddsa_round1" => Ok(ApiName::EddsaRound1),
            "eddsa_round2" => Ok(ApiName::EddsaRound2),
            other => Err(Error::ProtocolViolation(format!("Unknown API: {other}"))),
        }
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Created,
    InProgress,
    Completed,
    Failed,
    Aborted,
}

impl SessionState {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Aborted
        )
    }
}

/// Final ECDSA signature as the raw protocol tuple.
///
/// `big_r` is the full nonce point (compressed); chain-specific recovery-id
/// derivation is boundary logic and stays outside the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcdsaSignature {
    /// Nonce point R (SEC1 compressed)
    #[serde(with = "point_serde")]
    pub big_r: [u8; 33],
    /// S component, always in the curve's low half
    pub s: [u8; 32],
    /// Whether `s` had to be negated into the low half
    pub is_high: bool,
}

impl EcdsaSignature {
    /// r scalar (x-coordinate of R reduced mod n) as bytes
    pub fn r_bytes(&self) -> crate::Result<[u8; 32]> {
        let point = crate::ecdsa::decode_point(&self.big_r)?;
        Ok(crate::ecdsa::x_coordinate(&point).to_bytes().into())
    }
}

/// Serde helpers for SEC1-compressed points (serde has no built-in
/// `[u8; 33]` deserialize impl)
pub(crate) mod point_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(point: &[u8; 33], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(point.as_slice())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 33], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid compressed point length"))
    }
}

/// Serde helpers for k256 scalars stored inside round state
pub(crate) mod scalar_serde {
    use k256::{
        elliptic_curve::{bigint::U256, ops::Reduce},
        Scalar,
    };
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(scalar: &Scalar, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bytes = scalar.to_bytes();
        serializer.serialize_bytes(bytes.as_slice())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Scalar, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid scalar length"))?;
        Ok(<Scalar as Reduce<U256>>::reduce_bytes(&array.into()))
    }
}

//! Operation policy table
//!
//! Static mapping from operation type to the round APIs it may invoke and
//! the single API that completes it. Both functions are pure and total over
//! the operation enumeration; everything not listed is denied.
//!
//! The table expresses membership only. The `sign_in_reshare` ordering
//! (`signin` before `reshare`) is enforced by the session machine's
//! authenticated sub-state, not here.

use crate::types::{ApiName, OperationType};

/// APIs permitted to advance a session of the given operation type
pub fn allowed_apis(op: OperationType) -> &'static [ApiName] {
    match op {
        OperationType::SignUp => &[ApiName::Keygen],
        OperationType::SignIn => &[
            ApiName::SignIn,
            ApiName::Triples,
            ApiName::Presign,
            ApiName::Sign,
        ],
        OperationType::SignInReshare => &[
            ApiName::SignIn,
            ApiName::Triples,
            ApiName::Presign,
            ApiName::Sign,
            ApiName::Reshare,
        ],
        OperationType::AddEd25519 => &[
            ApiName::EddsaKeygen,
            ApiName::EddsaRound1,
            ApiName::EddsaRound2,
        ],
    }
}

/// APIs whose success completes a session of the given operation type
pub fn final_apis(op: OperationType) -> &'static [ApiName] {
    match op {
        OperationType::SignUp => &[ApiName::Keygen],
        OperationType::SignIn => &[ApiName::Sign],
        OperationType::SignInReshare => &[ApiName::Reshare],
        OperationType::AddEd25519 => &[ApiName::EddsaRound2],
    }
}

/// Whether `api` may advance a session of operation type `op`
pub fn is_api_allowed(op: OperationType, api: ApiName) -> bool {
    allowed_apis(op).contains(&api)
}

/// Whether a successful `api` call completes a session of operation type `op`
pub fn is_final_api(op: OperationType, api: ApiName) -> bool {
    final_apis(op).contains(&api)
}

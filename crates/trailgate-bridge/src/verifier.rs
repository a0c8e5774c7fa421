use thiserror::Error;
use trailgate_protocol::DenialCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenRejection {
    #[error("confirmation token missing")]
    Missing,
    #[error("confirmation token expired")]
    Expired,
}

impl TokenRejection {
    pub fn denial(&self) -> DenialCode {
        match self {
            Self::Missing => DenialCode::TokenMissing,
            Self::Expired => DenialCode::TokenExpired,
        }
    }
}

/// Per-call proof checked immediately before an effect runs.
pub trait ConfirmationVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<(), TokenRejection>;
}

/// Treats the token as opaque: present and not marked `expired*`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueTokenVerifier;

impl ConfirmationVerifier for OpaqueTokenVerifier {
    fn verify(&self, token: &str) -> Result<(), TokenRejection> {
        if token.is_empty() {
            return Err(TokenRejection::Missing);
        }
        if token.starts_with("expired") {
            return Err(TokenRejection::Expired);
        }
        Ok(())
    }
}

// Identity resolution for chat connections.
//
// Token issuance lives in the external auth service; this server only
// verifies tokens and maps their claims onto an `Identity`.

pub mod jwt;

use thiserror::Error;

use crate::error::{ApiError, ErrorCode};

/// User id carried by connections that presented no token.
pub const UNAUTHENTICATED_USER_ID: i64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
}

impl Identity {
    pub fn authenticated(user_id: i64, username: impl Into<String>) -> Self {
        Self { user_id, username: username.into() }
    }

    pub fn guest(username: impl Into<String>) -> Self {
        Self { user_id: UNAUTHENTICATED_USER_ID, username: username.into() }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id != UNAUTHENTICATED_USER_ID
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token claims do not contain user_id")]
    MissingUserId,
    #[error("token claim user_id is not a positive integer")]
    InvalidUserId,
    #[error("token claims do not contain username")]
    MissingUsername,
    #[error("token claim username is not a string")]
    InvalidUsername,
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidToken(_) => ErrorCode::AuthInvalidToken,
            Self::MissingUserId
            | Self::InvalidUserId
            | Self::MissingUsername
            | Self::InvalidUsername => ErrorCode::AuthInvalidClaims,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        ApiError::from_code(error.code())
    }
}

/// Verifies a bearer token and returns who it belongs to.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::{AuthError, Identity, UNAUTHENTICATED_USER_ID};
    use crate::error::ErrorCode;

    #[test]
    fn guest_identity_is_unauthenticated() {
        let guest = Identity::guest("guest-marker");
        assert_eq!(guest.user_id, UNAUTHENTICATED_USER_ID);
        assert!(!guest.is_authenticated());
        assert!(Identity::authenticated(1, "alice").is_authenticated());
    }

    #[test]
    fn claim_errors_map_to_invalid_claims_code() {
        assert_eq!(AuthError::MissingUserId.code(), ErrorCode::AuthInvalidClaims);
        assert_eq!(AuthError::InvalidUsername.code(), ErrorCode::AuthInvalidClaims);
        assert_eq!(AuthError::InvalidToken("bad".into()).code(), ErrorCode::AuthInvalidToken);
    }
}

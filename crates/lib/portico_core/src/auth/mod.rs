//! Authentication and session lifecycle.
//!
//! Password verification with lockout, TOTP multi-factor challenges, JWT
//! access tokens and rotating refresh tokens.

pub mod jwt;
pub mod password;
pub mod service;
pub mod store;
pub mod totp;

pub use service::AuthService;
pub use store::{InMemoryMfaChallengeStore, InMemoryRefreshTokenStore, MfaChallengeStore, RefreshTokenStore};

use thiserror::Error;

use crate::error::{ClassifiedError, ErrorKind, RepositoryError};

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is locked. Try again in {remaining_minutes} minute(s)")]
    Locked { remaining_minutes: i64 },

    #[error("Account is inactive")]
    Inactive,

    #[error("Invalid or expired MFA challenge")]
    InvalidMfaChallenge,

    #[error("Invalid MFA code")]
    InvalidMfaCode,

    #[error("MFA is not enrolled for this account")]
    MfaNotEnrolled,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Token error: {0}")]
    Token(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Email already registered")]
    DuplicateEmail,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClassifiedError for AuthError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials
            | Self::Locked { .. }
            | Self::Inactive
            | Self::InvalidMfaChallenge
            | Self::InvalidMfaCode
            | Self::InvalidRefreshToken
            | Self::Token(_) => ErrorKind::Unauthorized,
            Self::UserNotFound => ErrorKind::NotFound,
            Self::DuplicateEmail => ErrorKind::Conflict,
            Self::Validation(_) | Self::MfaNotEnrolled => ErrorKind::ValidationFailed,
            Self::Repository(e) => e.kind(),
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockout_message_carries_remaining_time() {
        let err = AuthError::Locked { remaining_minutes: 12 };
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(err.public_message().contains("12 minute"));
    }

    #[test]
    fn internal_errors_are_masked() {
        let err = AuthError::Internal("bcrypt: invalid cost".into());
        assert_eq!(err.public_message(), "Internal server error");
    }
}

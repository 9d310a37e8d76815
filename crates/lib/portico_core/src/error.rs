//! Error taxonomy shared by every subsystem.
//!
//! Each subsystem keeps its own `thiserror` enum; all of them classify into
//! an [`ErrorKind`] so the API layer can map failures without matching on
//! every variant, and so internal detail never leaks to a client.

use std::fmt::Display;

use serde::Serialize;
use thiserror::Error;

/// Client-facing error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    Conflict,
    ValidationFailed,
    RateLimitExceeded,
    CryptographicFailure,
    UpstreamUnavailable,
    ProviderNotImplemented,
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Conflict => "conflict",
            Self::ValidationFailed => "validation_failed",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::CryptographicFailure => "cryptographic_failure",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::ProviderNotImplemented => "provider_not_implemented",
            Self::Internal => "internal_error",
        }
    }

    /// Whether the error text is safe to return to a caller verbatim.
    pub fn exposes_detail(&self) -> bool {
        !matches!(
            self,
            Self::CryptographicFailure | Self::UpstreamUnavailable | Self::Internal
        )
    }

    /// Generic text used in place of the detailed message.
    pub fn generic_message(&self) -> &'static str {
        match self {
            Self::CryptographicFailure => "A cryptographic operation failed",
            Self::UpstreamUnavailable => "The upstream server is unavailable",
            Self::Internal => "Internal server error",
            Self::NotFound => "Not found",
            Self::Unauthorized => "Unauthorized",
            Self::Conflict => "Conflict",
            Self::ValidationFailed => "Validation failed",
            Self::RateLimitExceeded => "Rate limit exceeded",
            Self::ProviderNotImplemented => "Provider not implemented",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification implemented by every subsystem error.
pub trait ClassifiedError: Display {
    fn kind(&self) -> ErrorKind;

    /// Message suitable for a client response.
    fn public_message(&self) -> String {
        let kind = self.kind();
        if kind.exposes_detail() {
            self.to_string()
        } else {
            kind.generic_message().to_string()
        }
    }
}

/// Failure reported by an external repository collaborator.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ClassifiedError for RepositoryError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Internal,
        }
    }
}

//! MCP access gateway.
//!
//! Registry of upstream MCP servers (lifecycle, health, capabilities,
//! credentials) and the tool-execution proxy that sits in front of them.

pub mod client;
pub mod credentials;
pub mod hooks;
pub mod proxy;
pub mod rate_limit;
pub mod registry;

pub use client::{ClientError, McpClient, McpRequest, McpResponse, RmcpClient};
pub use credentials::CredentialStore;
pub use hooks::{HookContext, HookError, HookPipeline, HookScope, ToolCallOutcome, ToolHook};
pub use proxy::ToolProxy;
pub use rate_limit::RateLimiter;
pub use registry::ServerRegistry;

use thiserror::Error;
use uuid::Uuid;

use crate::authz::AuthzError;
use crate::error::{ClassifiedError, ErrorKind, RepositoryError};
use crate::vault::VaultError;

/// MCP gateway errors.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Server not found: {0}")]
    NotFound(String),

    #[error("Server {0} is inactive")]
    Inactive(Uuid),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate server name: {0}")]
    DuplicateServer(String),

    #[error("Rate limit exceeded. Retry in {retry_after_secs} second(s)")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("No credentials available for server {0}")]
    MissingCredentials(Uuid),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Hook error: {0}")]
    Hook(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ClassifiedError for McpError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Inactive(_) | Self::Validation(_) => ErrorKind::ValidationFailed,
            Self::Forbidden(_) | Self::MissingCredentials(_) => ErrorKind::Unauthorized,
            Self::DuplicateServer(_) => ErrorKind::Conflict,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::Timeout(_) | Self::Upstream(_) => ErrorKind::UpstreamUnavailable,
            Self::Hook(_) => ErrorKind::Internal,
            Self::Vault(e) => e.kind(),
            Self::Authz(e) => e.kind(),
            Self::Repository(e) => e.kind(),
        }
    }
}

impl From<ClientError> for McpError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Timeout(d) => Self::Timeout(d.as_secs()),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<HookError> for McpError {
    fn from(err: HookError) -> Self {
        match err {
            HookError::AccessDenied(msg) => Self::Forbidden(msg),
            HookError::Internal(msg) => Self::Hook(msg),
        }
    }
}

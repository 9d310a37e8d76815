//! Authorization engine: permission evaluation with deny precedence,
//! wildcard matching and typed conditions, plus claim-driven policies.

pub mod condition;
pub mod engine;
pub mod matching;

pub use condition::{Condition, TimeWindow};
pub use engine::AuthorizationEngine;

use thiserror::Error;

use crate::error::{ClassifiedError, ErrorKind, RepositoryError};

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("Permission not found: {0}")]
    PermissionNotFound(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ClassifiedError for AuthzError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionNotFound(_) => ErrorKind::NotFound,
            Self::Repository(e) => e.kind(),
        }
    }
}

use portico_core::auth::AuthError;
use portico_core::mcp::ClientError;
use portico_core::vault::VaultError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}", .0)]
    Custom(String),

    #[error("IO::{:?}: {}", .0, .0)]
    Io(#[from] std::io::Error),

    #[error("FlexiLogger::{:?}: {}", .0, .0)]
    FlexiLogger(#[from] flexi_logger::FlexiLoggerError),

    #[error("Json: {}", .0)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("MCP: {}", .0)]
    Client(#[from] ClientError),
}

//! # portico_core
//!
//! Core access-broker logic for Portico: credential vault, authorization
//! engine, authentication and session lifecycle, and the MCP gateway.

pub mod audit;
pub mod auth;
pub mod authz;
pub mod broker;
pub mod config;
pub mod crypto;
pub mod error;
pub mod mcp;
pub mod models;
pub mod repository;
pub mod vault;

pub use broker::{Broker, BrokerError, Collaborators};
pub use error::{ClassifiedError, ErrorKind};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

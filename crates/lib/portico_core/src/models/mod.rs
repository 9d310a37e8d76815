//! Domain models shared across subsystems.

pub mod auth;
pub mod authz;
pub mod mcp;
pub mod vault;

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable) identifier.
///
/// Used for records where creation order matters: server ids, health
/// entries, permission ids and secret version ids.
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}

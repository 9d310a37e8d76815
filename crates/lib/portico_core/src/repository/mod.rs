//! Persistence collaborators consumed by the core.
//!
//! The relational layer lives outside this crate; services depend only on
//! these traits. [`memory`] provides reference implementations.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::auth::User;
use crate::models::authz::{AuthorizationPolicy, Permission, UserPermission};
use crate::models::mcp::{CapabilitySnapshot, McpServer, McpServerHealth, ServerStatistics, ServerStatus};

pub type RepoResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn get_by_id(&self, id: Uuid) -> RepoResult<Option<User>>;
    /// Fails with `Conflict` when the email is taken.
    async fn create(&self, user: User) -> RepoResult<User>;
    /// Write profile, password and MFA fields. The lockout counter, lock
    /// and last login keep their stored values; they change only through
    /// the targeted writes below.
    async fn update(&self, user: &User) -> RepoResult<()>;
    /// Remove one backup code hash if present, atomically. Returns the
    /// number of codes left, or `None` when the hash was not found.
    async fn consume_backup_code(&self, id: Uuid, code_hash: &str) -> RepoResult<Option<usize>>;
    /// Increment and return the new counter value.
    async fn increment_failed_login_attempts(&self, id: Uuid) -> RepoResult<u32>;
    async fn reset_failed_login_attempts(&self, id: Uuid) -> RepoResult<()>;
    async fn lock_user(&self, id: Uuid, until: DateTime<Utc>) -> RepoResult<()>;
    /// Clear the lock and the failed-attempt counter.
    async fn unlock_user(&self, id: Uuid) -> RepoResult<()>;
    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<()>;
    /// Role names held by the user, embedded in access tokens.
    async fn get_roles(&self, id: Uuid) -> RepoResult<Vec<String>>;
}

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    /// Direct grants, including expired ones; callers filter by expiry.
    async fn get_user_permissions(&self, user_id: Uuid) -> RepoResult<Vec<UserPermission>>;
    async fn get_user_roles(&self, user_id: Uuid) -> RepoResult<Vec<Uuid>>;
    async fn get_role_permissions(&self, role_id: Uuid) -> RepoResult<Vec<Permission>>;
    async fn get_permission(&self, id: Uuid) -> RepoResult<Option<Permission>>;
    async fn create_permission(&self, permission: Permission) -> RepoResult<Permission>;
    async fn delete_permission(&self, id: Uuid) -> RepoResult<()>;
    async fn assign_permission_to_user(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> RepoResult<()>;
    async fn revoke_permission_from_user(&self, user_id: Uuid, permission_id: Uuid) -> RepoResult<()>;
    async fn assign_role_to_user(&self, user_id: Uuid, role_id: Uuid) -> RepoResult<()>;
    async fn remove_role_from_user(&self, user_id: Uuid, role_id: Uuid) -> RepoResult<()>;
    /// Replace the role's permission set atomically. No partial set is ever
    /// visible to readers.
    async fn set_role_permissions(&self, role_id: Uuid, permission_ids: &[Uuid]) -> RepoResult<()>;
    async fn create_policy(&self, policy: AuthorizationPolicy) -> RepoResult<AuthorizationPolicy>;
    async fn list_policies(&self) -> RepoResult<Vec<AuthorizationPolicy>>;
}

#[async_trait]
pub trait McpServerRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> RepoResult<Option<McpServer>>;
    async fn get_by_name(&self, name: &str, organization_id: Uuid) -> RepoResult<Option<McpServer>>;
    async fn list(&self, organization_id: Uuid, include_inactive: bool) -> RepoResult<Vec<McpServer>>;
    /// Every server across organizations (health monitoring).
    async fn list_all(&self) -> RepoResult<Vec<McpServer>>;
    /// Fails with `Conflict` when the name exists in the organization.
    async fn create(&self, server: McpServer) -> RepoResult<McpServer>;
    /// Write the configuration fields (name, description, connection, auth
    /// type, metadata). Status, health check time, capabilities and
    /// activation keep their stored values.
    async fn update(&self, server: &McpServer) -> RepoResult<()>;
    async fn update_capabilities(&self, id: Uuid, snapshot: &CapabilitySnapshot) -> RepoResult<()>;
    async fn set_active(&self, id: Uuid, active: bool) -> RepoResult<()>;
    async fn delete(&self, id: Uuid) -> RepoResult<()>;
    /// Append a history entry and set the server's status and check time.
    async fn record_health_check(&self, health: &McpServerHealth) -> RepoResult<()>;
    async fn set_status(&self, id: Uuid, status: ServerStatus) -> RepoResult<()>;
    /// Newest first.
    async fn get_health_history(&self, server_id: Uuid, limit: usize) -> RepoResult<Vec<McpServerHealth>>;
    async fn get_statistics(&self, organization_id: Uuid) -> RepoResult<ServerStatistics>;
    async fn search(&self, organization_id: Uuid, query: &str) -> RepoResult<Vec<McpServer>>;
}

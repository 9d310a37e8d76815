//! In-memory repositories backed by `tokio::sync::RwLock`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{McpServerRepository, PermissionRepository, RepoResult, UserRepository};
use crate::error::RepositoryError;
use crate::models::auth::User;
use crate::models::authz::{AuthorizationPolicy, Permission, UserPermission};
use crate::models::mcp::{CapabilitySnapshot, McpServer, McpServerHealth, ServerStatistics, ServerStatus};

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<Uuid, User>>,
    roles: RwLock<HashMap<Uuid, Vec<String>>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_roles(&self, user_id: Uuid, roles: Vec<String>) {
        self.roles.write().await.insert(user_id, roles);
    }

    async fn modify<F>(&self, id: Uuid, f: F) -> RepoResult<()>
    where
        F: FnOnce(&mut User) + Send,
    {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {id}")))?;
        f(user);
        user.updated_at = Utc::now();
        Ok(())
    }
}

fn same_email(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn get_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| same_email(&u.email, email)).cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn create(&self, user: User) -> RepoResult<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| same_email(&u.email, &user.email)) {
            return Err(RepositoryError::Conflict(format!("email {}", user.email)));
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: &User) -> RepoResult<()> {
        let mut users = self.users.write().await;
        match users.get_mut(&user.id) {
            Some(existing) => {
                let mut next = user.clone();
                next.failed_login_attempts = existing.failed_login_attempts;
                next.locked_until = existing.locked_until;
                next.last_login_at = existing.last_login_at;
                next.updated_at = Utc::now();
                *existing = next;
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("user {}", user.id))),
        }
    }

    async fn consume_backup_code(&self, id: Uuid, code_hash: &str) -> RepoResult<Option<usize>> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {id}")))?;
        let Some(pos) = user.backup_code_hashes.iter().position(|h| h == code_hash) else {
            return Ok(None);
        };
        user.backup_code_hashes.remove(pos);
        user.updated_at = Utc::now();
        Ok(Some(user.backup_code_hashes.len()))
    }

    async fn increment_failed_login_attempts(&self, id: Uuid) -> RepoResult<u32> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {id}")))?;
        user.failed_login_attempts += 1;
        Ok(user.failed_login_attempts)
    }

    async fn reset_failed_login_attempts(&self, id: Uuid) -> RepoResult<()> {
        self.modify(id, |u| u.failed_login_attempts = 0).await
    }

    async fn lock_user(&self, id: Uuid, until: DateTime<Utc>) -> RepoResult<()> {
        self.modify(id, |u| u.locked_until = Some(until)).await
    }

    async fn unlock_user(&self, id: Uuid) -> RepoResult<()> {
        self.modify(id, |u| {
            u.locked_until = None;
            u.failed_login_attempts = 0;
        })
        .await
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<()> {
        self.modify(id, |u| u.last_login_at = Some(at)).await
    }

    async fn get_roles(&self, id: Uuid) -> RepoResult<Vec<String>> {
        Ok(self.roles.read().await.get(&id).cloned().unwrap_or_default())
    }
}

// =============================================================================
// Permissions
// =============================================================================

#[derive(Debug, Default)]
struct PermissionState {
    permissions: HashMap<Uuid, Permission>,
    /// user -> (permission id -> expiry)
    user_grants: HashMap<Uuid, HashMap<Uuid, Option<DateTime<Utc>>>>,
    user_roles: HashMap<Uuid, HashSet<Uuid>>,
    role_permissions: HashMap<Uuid, Vec<Uuid>>,
    policies: Vec<AuthorizationPolicy>,
}

/// All state sits under one lock so role replacement is atomic.
#[derive(Debug, Default)]
pub struct InMemoryPermissionRepository {
    state: RwLock<PermissionState>,
}

impl InMemoryPermissionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing_permission(id: Uuid) -> RepositoryError {
    RepositoryError::NotFound(format!("permission {id}"))
}

#[async_trait]
impl PermissionRepository for InMemoryPermissionRepository {
    async fn get_user_permissions(&self, user_id: Uuid) -> RepoResult<Vec<UserPermission>> {
        let state = self.state.read().await;
        let grants = match state.user_grants.get(&user_id) {
            Some(g) => g,
            None => return Ok(Vec::new()),
        };
        Ok(grants
            .iter()
            .filter_map(|(pid, expires_at)| {
                state.permissions.get(pid).map(|p| UserPermission {
                    permission: p.clone(),
                    expires_at: *expires_at,
                })
            })
            .collect())
    }

    async fn get_user_roles(&self, user_id: Uuid) -> RepoResult<Vec<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .user_roles
            .get(&user_id)
            .map(|r| r.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn get_role_permissions(&self, role_id: Uuid) -> RepoResult<Vec<Permission>> {
        let state = self.state.read().await;
        Ok(state
            .role_permissions
            .get(&role_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.permissions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_permission(&self, id: Uuid) -> RepoResult<Option<Permission>> {
        Ok(self.state.read().await.permissions.get(&id).cloned())
    }

    async fn create_permission(&self, permission: Permission) -> RepoResult<Permission> {
        let mut state = self.state.write().await;
        if state.permissions.contains_key(&permission.id) {
            return Err(RepositoryError::Conflict(format!("permission {}", permission.id)));
        }
        state.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn delete_permission(&self, id: Uuid) -> RepoResult<()> {
        let mut state = self.state.write().await;
        state.permissions.remove(&id).ok_or_else(|| missing_permission(id))?;
        for grants in state.user_grants.values_mut() {
            grants.remove(&id);
        }
        for ids in state.role_permissions.values_mut() {
            ids.retain(|p| *p != id);
        }
        Ok(())
    }

    async fn assign_permission_to_user(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> RepoResult<()> {
        let mut state = self.state.write().await;
        if !state.permissions.contains_key(&permission_id) {
            return Err(missing_permission(permission_id));
        }
        state
            .user_grants
            .entry(user_id)
            .or_default()
            .insert(permission_id, expires_at);
        Ok(())
    }

    async fn revoke_permission_from_user(&self, user_id: Uuid, permission_id: Uuid) -> RepoResult<()> {
        let mut state = self.state.write().await;
        if let Some(grants) = state.user_grants.get_mut(&user_id) {
            grants.remove(&permission_id);
        }
        Ok(())
    }

    async fn assign_role_to_user(&self, user_id: Uuid, role_id: Uuid) -> RepoResult<()> {
        let mut state = self.state.write().await;
        state.user_roles.entry(user_id).or_default().insert(role_id);
        Ok(())
    }

    async fn remove_role_from_user(&self, user_id: Uuid, role_id: Uuid) -> RepoResult<()> {
        let mut state = self.state.write().await;
        if let Some(roles) = state.user_roles.get_mut(&user_id) {
            roles.remove(&role_id);
        }
        Ok(())
    }

    async fn set_role_permissions(&self, role_id: Uuid, permission_ids: &[Uuid]) -> RepoResult<()> {
        let mut state = self.state.write().await;
        if let Some(missing) = permission_ids
            .iter()
            .find(|id| !state.permissions.contains_key(id))
        {
            return Err(missing_permission(*missing));
        }
        let mut ids = Vec::with_capacity(permission_ids.len());
        for id in permission_ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        state.role_permissions.insert(role_id, ids);
        Ok(())
    }

    async fn create_policy(&self, policy: AuthorizationPolicy) -> RepoResult<AuthorizationPolicy> {
        let mut state = self.state.write().await;
        if state.policies.iter().any(|p| p.name == policy.name) {
            return Err(RepositoryError::Conflict(format!("policy {}", policy.name)));
        }
        state.policies.push(policy.clone());
        Ok(policy)
    }

    async fn list_policies(&self) -> RepoResult<Vec<AuthorizationPolicy>> {
        Ok(self.state.read().await.policies.clone())
    }
}

// =============================================================================
// MCP servers
// =============================================================================

#[derive(Debug, Default)]
struct ServerState {
    servers: HashMap<Uuid, McpServer>,
    health: HashMap<Uuid, Vec<McpServerHealth>>,
}

#[derive(Debug, Default)]
pub struct InMemoryMcpServerRepository {
    state: RwLock<ServerState>,
}

impl InMemoryMcpServerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn missing_server(id: Uuid) -> RepositoryError {
    RepositoryError::NotFound(format!("server {id}"))
}

#[async_trait]
impl McpServerRepository for InMemoryMcpServerRepository {
    async fn get_by_id(&self, id: Uuid) -> RepoResult<Option<McpServer>> {
        Ok(self.state.read().await.servers.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str, organization_id: Uuid) -> RepoResult<Option<McpServer>> {
        let state = self.state.read().await;
        Ok(state
            .servers
            .values()
            .find(|s| s.organization_id == organization_id && same_name(&s.name, name))
            .cloned())
    }

    async fn list(&self, organization_id: Uuid, include_inactive: bool) -> RepoResult<Vec<McpServer>> {
        let state = self.state.read().await;
        let mut servers: Vec<McpServer> = state
            .servers
            .values()
            .filter(|s| s.organization_id == organization_id && (include_inactive || s.is_active))
            .cloned()
            .collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(servers)
    }

    async fn list_all(&self) -> RepoResult<Vec<McpServer>> {
        Ok(self.state.read().await.servers.values().cloned().collect())
    }

    async fn create(&self, server: McpServer) -> RepoResult<McpServer> {
        let mut state = self.state.write().await;
        if state
            .servers
            .values()
            .any(|s| s.organization_id == server.organization_id && same_name(&s.name, &server.name))
        {
            return Err(RepositoryError::Conflict(format!("server name {}", server.name)));
        }
        state.servers.insert(server.id, server.clone());
        Ok(server)
    }

    async fn update(&self, server: &McpServer) -> RepoResult<()> {
        let mut state = self.state.write().await;
        if state.servers.values().any(|s| {
            s.id != server.id
                && s.organization_id == server.organization_id
                && same_name(&s.name, &server.name)
        }) {
            return Err(RepositoryError::Conflict(format!("server name {}", server.name)));
        }
        let existing = state
            .servers
            .get_mut(&server.id)
            .ok_or_else(|| missing_server(server.id))?;
        existing.name = server.name.clone();
        existing.description = server.description.clone();
        existing.connection = server.connection.clone();
        existing.auth_type = server.auth_type;
        existing.metadata = server.metadata.clone();
        existing.updated_at = server.updated_at;
        Ok(())
    }

    async fn update_capabilities(&self, id: Uuid, snapshot: &CapabilitySnapshot) -> RepoResult<()> {
        let mut state = self.state.write().await;
        let server = state.servers.get_mut(&id).ok_or_else(|| missing_server(id))?;
        server.capabilities = Some(snapshot.clone());
        server.updated_at = Utc::now();
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> RepoResult<()> {
        let mut state = self.state.write().await;
        let server = state.servers.get_mut(&id).ok_or_else(|| missing_server(id))?;
        server.is_active = active;
        server.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> RepoResult<()> {
        let mut state = self.state.write().await;
        state.servers.remove(&id).ok_or_else(|| missing_server(id))?;
        state.health.remove(&id);
        Ok(())
    }

    async fn record_health_check(&self, health: &McpServerHealth) -> RepoResult<()> {
        let mut state = self.state.write().await;
        let server = state
            .servers
            .get_mut(&health.server_id)
            .ok_or_else(|| missing_server(health.server_id))?;
        server.status = health.status;
        server.last_health_check = Some(health.checked_at);
        state
            .health
            .entry(health.server_id)
            .or_default()
            .push(health.clone());
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: ServerStatus) -> RepoResult<()> {
        let mut state = self.state.write().await;
        let server = state.servers.get_mut(&id).ok_or_else(|| missing_server(id))?;
        server.status = status;
        server.updated_at = Utc::now();
        Ok(())
    }

    async fn get_health_history(&self, server_id: Uuid, limit: usize) -> RepoResult<Vec<McpServerHealth>> {
        let state = self.state.read().await;
        Ok(state
            .health
            .get(&server_id)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_statistics(&self, organization_id: Uuid) -> RepoResult<ServerStatistics> {
        let state = self.state.read().await;
        let mut stats = ServerStatistics::default();
        for server in state.servers.values().filter(|s| s.organization_id == organization_id) {
            stats.record(server);
        }
        Ok(stats)
    }

    async fn search(&self, organization_id: Uuid, query: &str) -> RepoResult<Vec<McpServer>> {
        let needle = query.trim().to_lowercase();
        let state = self.state.read().await;
        let mut hits: Vec<McpServer> = state
            .servers
            .values()
            .filter(|s| s.organization_id == organization_id)
            .filter(|s| {
                needle.is_empty()
                    || s.name.to_lowercase().contains(&needle)
                    || s.description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
                    || s.connection.url.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mcp::{AuthType, ConnectionInfo};

    fn user(email: &str) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            email: email.into(),
            name: None,
            password_hash: String::new(),
            is_active: true,
            mfa_enabled: false,
            mfa_secret: None,
            backup_code_hashes: Vec::new(),
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn server(org: Uuid, name: &str) -> McpServer {
        let now = Utc::now();
        McpServer {
            id: Uuid::new_v4(),
            organization_id: org,
            name: name.into(),
            description: None,
            connection: ConnectionInfo::new("http://localhost:1"),
            auth_type: AuthType::None,
            status: ServerStatus::Unknown,
            is_active: true,
            metadata: HashMap::new(),
            capabilities: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            last_health_check: None,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let repo = InMemoryUserRepository::new();
        repo.create(user("a@example.com")).await.unwrap();
        let err = repo.create(user("A@example.com")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn failed_attempts_count_up_and_reset_on_unlock() {
        let repo = InMemoryUserRepository::new();
        let u = repo.create(user("a@example.com")).await.unwrap();
        assert_eq!(repo.increment_failed_login_attempts(u.id).await.unwrap(), 1);
        assert_eq!(repo.increment_failed_login_attempts(u.id).await.unwrap(), 2);
        repo.lock_user(u.id, Utc::now()).await.unwrap();
        repo.unlock_user(u.id).await.unwrap();
        let u = repo.get_by_id(u.id).await.unwrap().unwrap();
        assert_eq!(u.failed_login_attempts, 0);
        assert!(u.locked_until.is_none());
    }

    #[tokio::test]
    async fn profile_update_keeps_lockout_state() {
        let repo = InMemoryUserRepository::new();
        let u = repo.create(user("a@example.com")).await.unwrap();
        let mut stale = repo.get_by_id(u.id).await.unwrap().unwrap();
        let until = Utc::now() + chrono::Duration::minutes(15);
        repo.increment_failed_login_attempts(u.id).await.unwrap();
        repo.lock_user(u.id, until).await.unwrap();

        stale.name = Some("Ada".into());
        repo.update(&stale).await.unwrap();
        let stored = repo.get_by_id(u.id).await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("Ada"));
        assert_eq!(stored.failed_login_attempts, 1);
        assert_eq!(stored.locked_until, Some(until));
    }

    #[tokio::test]
    async fn backup_codes_are_consumed_once() {
        let repo = InMemoryUserRepository::new();
        let mut u = user("a@example.com");
        u.backup_code_hashes = vec!["h1".into(), "h2".into()];
        let u = repo.create(u).await.unwrap();
        assert_eq!(repo.consume_backup_code(u.id, "h1").await.unwrap(), Some(1));
        assert_eq!(repo.consume_backup_code(u.id, "h1").await.unwrap(), None);
        assert_eq!(repo.consume_backup_code(u.id, "h2").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn role_permissions_are_replaced_wholesale() {
        let repo = InMemoryPermissionRepository::new();
        let a = repo.create_permission(Permission::allow("users", "read")).await.unwrap();
        let b = repo.create_permission(Permission::allow("users", "write")).await.unwrap();
        let role = Uuid::new_v4();
        repo.set_role_permissions(role, &[a.id, b.id]).await.unwrap();
        repo.set_role_permissions(role, &[b.id]).await.unwrap();
        let perms = repo.get_role_permissions(role).await.unwrap();
        assert_eq!(perms.len(), 1);
        assert_eq!(perms[0].id, b.id);
    }

    #[tokio::test]
    async fn role_replacement_with_unknown_id_changes_nothing() {
        let repo = InMemoryPermissionRepository::new();
        let a = repo.create_permission(Permission::allow("users", "read")).await.unwrap();
        let role = Uuid::new_v4();
        repo.set_role_permissions(role, &[a.id]).await.unwrap();
        assert!(repo.set_role_permissions(role, &[Uuid::new_v4()]).await.is_err());
        assert_eq!(repo.get_role_permissions(role).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_names_unique_per_organization() {
        let repo = InMemoryMcpServerRepository::new();
        let org = Uuid::new_v4();
        repo.create(server(org, "search")).await.unwrap();
        assert!(matches!(
            repo.create(server(org, "Search")).await,
            Err(RepositoryError::Conflict(_))
        ));
        repo.create(server(Uuid::new_v4(), "search")).await.unwrap();
    }

    #[tokio::test]
    async fn server_update_writes_configuration_only() {
        let repo = InMemoryMcpServerRepository::new();
        let s = repo.create(server(Uuid::new_v4(), "s")).await.unwrap();
        repo.set_status(s.id, ServerStatus::Maintenance).await.unwrap();
        repo.set_active(s.id, false).await.unwrap();

        let mut stale = s.clone();
        stale.description = Some("search".into());
        repo.update(&stale).await.unwrap();
        let stored = repo.get_by_id(s.id).await.unwrap().unwrap();
        assert_eq!(stored.description.as_deref(), Some("search"));
        assert_eq!(stored.status, ServerStatus::Maintenance);
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn health_history_is_newest_first() {
        let repo = InMemoryMcpServerRepository::new();
        let s = repo.create(server(Uuid::new_v4(), "s")).await.unwrap();
        for status in [ServerStatus::Offline, ServerStatus::Online] {
            repo.record_health_check(&McpServerHealth {
                id: Uuid::new_v4(),
                server_id: s.id,
                status,
                checked_at: Utc::now(),
                response_time_ms: 1,
                error_message: None,
            })
            .await
            .unwrap();
        }
        let history = repo.get_health_history(s.id, 10).await.unwrap();
        assert_eq!(history[0].status, ServerStatus::Online);
        assert_eq!(
            repo.get_by_id(s.id).await.unwrap().unwrap().status,
            ServerStatus::Online
        );
    }
}

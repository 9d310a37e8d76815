//! Service assembly and the authenticated entry point for tool calls.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::{AuditSink, Auditor, TracingAuditSink};
use crate::auth::{AuthError, AuthService};
use crate::authz::AuthorizationEngine;
use crate::config::PorticoConfig;
use crate::error::{ClassifiedError, ErrorKind};
use crate::mcp::hooks::AuthorizationHook;
use crate::mcp::{CredentialStore, HookPipeline, HookScope, McpClient, McpError, ServerRegistry, ToolProxy};
use crate::models::mcp::{ToolRequest, ToolResponse};
use crate::repository::memory::{InMemoryMcpServerRepository, InMemoryPermissionRepository, InMemoryUserRepository};
use crate::repository::{McpServerRepository, PermissionRepository, UserRepository};
use crate::vault::{VaultError, VaultManager};

/// How often expired sessions and rate-limit windows are swept.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl ClassifiedError for BrokerError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(e) => e.kind(),
            Self::Mcp(e) => e.kind(),
            Self::Vault(e) => e.kind(),
        }
    }
}

/// External collaborators the broker is wired against.
pub struct Collaborators {
    pub users: Arc<dyn UserRepository>,
    pub permissions: Arc<dyn PermissionRepository>,
    pub servers: Arc<dyn McpServerRepository>,
    pub audit: Arc<dyn AuditSink>,
    pub client: Arc<dyn McpClient>,
}

impl Collaborators {
    /// In-memory repositories with `tracing` audit output.
    pub fn in_memory(client: Arc<dyn McpClient>) -> Self {
        Self {
            users: Arc::new(InMemoryUserRepository::new()),
            permissions: Arc::new(InMemoryPermissionRepository::new()),
            servers: Arc::new(InMemoryMcpServerRepository::new()),
            audit: Arc::new(TracingAuditSink),
            client,
        }
    }
}

/// Every broker service, sharing one vault and one set of repositories.
#[derive(Debug, Clone)]
pub struct Broker {
    auth: Arc<AuthService>,
    authz: Arc<AuthorizationEngine>,
    vault: Arc<VaultManager>,
    registry: Arc<ServerRegistry>,
    proxy: Arc<ToolProxy>,
    config: Arc<PorticoConfig>,
}

impl Broker {
    pub fn assemble(config: PorticoConfig, deps: Collaborators) -> Result<Self, BrokerError> {
        let vault = Arc::new(VaultManager::from_config(&config.vault)?);
        Ok(Self::assemble_with_vault(config, deps, vault))
    }

    /// Wire the services around an already opened vault.
    pub fn assemble_with_vault(config: PorticoConfig, deps: Collaborators, vault: Arc<VaultManager>) -> Self {
        let auditor = Auditor::new(deps.audit);
        let authz = Arc::new(AuthorizationEngine::new(deps.permissions));
        let credentials = CredentialStore::new(Arc::clone(&vault));

        let auth = Arc::new(AuthService::new(config.auth.clone(), deps.users, auditor.clone()));
        let registry = Arc::new(ServerRegistry::new(
            Arc::clone(&deps.servers),
            credentials.clone(),
            Arc::clone(&deps.client),
            config.gateway.clone(),
        ));
        let hooks = HookPipeline::new(vec![(
            HookScope::Global,
            Arc::new(AuthorizationHook::new(Arc::clone(&authz))),
        )]);
        let proxy = Arc::new(ToolProxy::new(
            deps.servers,
            credentials,
            deps.client,
            hooks,
            auditor,
            config.gateway.clone(),
        ));
        info!(vault = %config.vault.provider, "broker assembled");

        Self {
            auth,
            authz,
            vault,
            registry,
            proxy,
            config: Arc::new(config),
        }
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn authz(&self) -> &AuthorizationEngine {
        &self.authz
    }

    pub fn vault(&self) -> &VaultManager {
        &self.vault
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn proxy(&self) -> &ToolProxy {
        &self.proxy
    }

    /// Execute a tool on behalf of the bearer of `access_token`.
    pub async fn execute_tool(&self, access_token: &str, request: ToolRequest) -> Result<ToolResponse, BrokerError> {
        let claims = self.auth.validate_access_token(access_token)?;
        let (Some(user_id), Some(organization_id)) = (claims.user_id(), claims.organization_id()) else {
            return Err(AuthError::Token("malformed subject or organization claim".into()).into());
        };
        debug!(%user_id, server_id = %request.server_id, tool = %request.tool_name, "tool call");
        Ok(self.proxy.execute_tool(request, user_id, organization_id).await?)
    }

    /// Start the periodic health monitor and the expiry sweeper. Both stop
    /// when `cancel` fires.
    pub fn start_background_tasks(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let monitor = self.registry.start_health_monitor(
            Duration::from_secs(self.config.gateway.health_check_interval_secs.max(1)),
            cancel.clone(),
        );

        let auth = Arc::clone(&self.auth);
        let proxy = Arc::clone(&self.proxy);
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PURGE_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match auth.purge_expired().await {
                            Ok(n) if n > 0 => debug!(purged = n, "expired sessions purged"),
                            Ok(_) => {}
                            Err(e) => warn!("session purge failed: {e}"),
                        }
                        proxy.rate_limiter().purge_expired();
                    }
                }
            }
        });
        vec![monitor, sweeper]
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;
    use uuid::Uuid;

    use super::*;
    use crate::config::{AuthConfig, GatewayConfig, VaultConfig};
    use crate::crypto::generate_key;
    use crate::mcp::{ClientError, McpRequest, McpResponse};
    use crate::models::auth::RegisterRequest;
    use crate::models::mcp::{ConnectionInfo, RegisterServerRequest, ServerCredentials};

    struct OkClient;

    #[async_trait]
    impl McpClient for OkClient {
        async fn send(
            &self,
            _connection: &ConnectionInfo,
            _credentials: Option<&ServerCredentials>,
            _request: McpRequest,
        ) -> Result<McpResponse, ClientError> {
            Ok(McpResponse::ok(Value::Array(Vec::new())))
        }
    }

    fn broker(dir: &tempfile::TempDir) -> Broker {
        let config = PorticoConfig {
            auth: AuthConfig::with_secret("broker-test"),
            vault: VaultConfig {
                storage_dir: dir.path().to_path_buf(),
                master_key: Some(generate_key()),
                ..VaultConfig::default()
            },
            gateway: GatewayConfig::default(),
        };
        Broker::assemble(config, Collaborators::in_memory(Arc::new(OkClient))).unwrap()
    }

    #[tokio::test]
    async fn missing_master_key_fails_assembly() {
        let config = PorticoConfig {
            auth: AuthConfig::with_secret("s"),
            vault: VaultConfig::default(),
            gateway: GatewayConfig::default(),
        };
        let err = Broker::assemble(config, Collaborators::in_memory(Arc::new(OkClient))).unwrap_err();
        assert!(matches!(err, BrokerError::Vault(VaultError::Configuration(_))));
    }

    #[tokio::test]
    async fn invalid_token_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let err = broker(&dir)
            .execute_tool("garbage", ToolRequest::new(Uuid::new_v4(), "t"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn authorization_hook_is_wired_in() {
        let dir = tempfile::tempdir().unwrap();
        let broker = broker(&dir);
        let org = Uuid::new_v4();
        broker
            .auth()
            .register(RegisterRequest {
                organization_id: org,
                email: "ada@example.com".into(),
                password: "Sup3r!secret".into(),
                name: None,
            })
            .await
            .unwrap();
        let token = broker
            .auth()
            .login("ada@example.com", "Sup3r!secret", None)
            .await
            .unwrap()
            .tokens()
            .unwrap()
            .access_token
            .clone();
        let server = broker
            .registry()
            .register_server(org, None, RegisterServerRequest::new("tools", "http://tools.local"))
            .await
            .unwrap();

        let err = broker
            .execute_tool(&token, ToolRequest::new(server.id, "search"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Mcp(McpError::Forbidden(_))));
    }

    #[tokio::test]
    async fn background_tasks_stop_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let broker = broker(&dir);
        let cancel = CancellationToken::new();
        let handles = broker.start_background_tasks(cancel.clone());
        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}

//! Server registry: lifecycle, health, capabilities and credentials.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::client::{ClientError, McpClient, McpRequest};
use super::credentials::CredentialStore;
use super::McpError;
use crate::config::GatewayConfig;
use crate::error::{ClassifiedError, RepositoryError};
use crate::models::mcp::{
    BulkItemError, BulkOperationResult, CapabilitySnapshot, McpServer, McpServerHealth,
    RegisterServerRequest, ServerCredentials, ServerHealthReport, ServerStatistics, ServerStatus,
    UpdateServerRequest,
};
use crate::models::new_id;
use crate::repository::McpServerRepository;

/// Default number of history records returned.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

pub struct ServerRegistry {
    servers: Arc<dyn McpServerRepository>,
    credentials: CredentialStore,
    client: Arc<dyn McpClient>,
    config: GatewayConfig,
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ServerRegistry {
    pub fn new(
        servers: Arc<dyn McpServerRepository>,
        credentials: CredentialStore,
        client: Arc<dyn McpClient>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            servers,
            credentials,
            client,
            config,
        }
    }

    // -------------------------------------------------------------------------
    // CRUD
    // -------------------------------------------------------------------------

    /// Register a server, store its credentials and run an initial probe.
    ///
    /// A failed probe or capability fetch leaves the server registered with
    /// status `Error`.
    pub async fn register_server(
        &self,
        organization_id: Uuid,
        created_by: Option<Uuid>,
        mut request: RegisterServerRequest,
    ) -> Result<McpServer, McpError> {
        validate_registration(&request)?;
        if self
            .servers
            .get_by_name(request.name.trim(), organization_id)
            .await?
            .is_some()
        {
            return Err(McpError::DuplicateServer(request.name));
        }
        if request.connection.timeout_secs == 0 {
            request.connection.timeout_secs = self.config.default_timeout_secs;
        }

        let now = Utc::now();
        let server = McpServer {
            id: new_id(),
            organization_id,
            name: request.name.trim().to_string(),
            description: request.description,
            connection: request.connection,
            auth_type: request.auth_type,
            status: ServerStatus::Unknown,
            is_active: true,
            metadata: request.metadata,
            capabilities: None,
            created_by,
            created_at: now,
            updated_at: now,
            last_health_check: None,
        };
        let server = self.servers.create(server).await.map_err(|e| match e {
            RepositoryError::Conflict(_) => McpError::DuplicateServer(request.name.clone()),
            other => McpError::Repository(other),
        })?;

        if let Some(creds) = &request.credentials
            && let Err(e) = self.credentials.save(server.id, None, creds).await
        {
            // Never leave a server behind whose credentials were lost.
            if let Err(cleanup) = self.servers.delete(server.id).await {
                warn!(server_id = %server.id, "failed to roll back registration: {cleanup}");
            }
            return Err(e);
        }
        info!(server_id = %server.id, name = %server.name, "registered MCP server");

        self.initial_probe(&server, request.credentials.as_ref()).await;
        self.get_server(server.id).await
    }

    async fn initial_probe(&self, server: &McpServer, credentials: Option<&ServerCredentials>) {
        let healthy = match self.probe(server, credentials).await {
            Ok(health) => health.is_healthy(),
            Err(e) => {
                warn!(server_id = %server.id, "initial health probe failed: {e}");
                false
            }
        };
        let fetched = healthy
            && match self.fetch_capabilities(server.id, credentials).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(server_id = %server.id, "initial capability fetch failed: {e}");
                    false
                }
            };
        if !fetched
            && let Err(e) = self.servers.set_status(server.id, ServerStatus::Error).await
        {
            warn!(server_id = %server.id, "failed to mark server as errored: {e}");
        }
    }

    pub async fn get_server(&self, id: Uuid) -> Result<McpServer, McpError> {
        self.servers
            .get_by_id(id)
            .await?
            .ok_or_else(|| McpError::NotFound(id.to_string()))
    }

    pub async fn get_server_by_name(&self, organization_id: Uuid, name: &str) -> Result<McpServer, McpError> {
        self.servers
            .get_by_name(name, organization_id)
            .await?
            .ok_or_else(|| McpError::NotFound(name.to_string()))
    }

    pub async fn list_servers(&self, organization_id: Uuid, include_inactive: bool) -> Result<Vec<McpServer>, McpError> {
        Ok(self.servers.list(organization_id, include_inactive).await?)
    }

    pub async fn search_servers(&self, organization_id: Uuid, query: &str) -> Result<Vec<McpServer>, McpError> {
        Ok(self.servers.search(organization_id, query.trim()).await?)
    }

    pub async fn update_server(&self, id: Uuid, update: UpdateServerRequest) -> Result<McpServer, McpError> {
        let mut server = self.get_server(id).await?;

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(McpError::Validation("name must not be blank".into()));
            }
            if !name.eq_ignore_ascii_case(&server.name)
                && self
                    .servers
                    .get_by_name(&name, server.organization_id)
                    .await?
                    .is_some()
            {
                return Err(McpError::DuplicateServer(name));
            }
            server.name = name;
        }
        if let Some(description) = update.description {
            server.description = Some(description);
        }
        if let Some(connection) = update.connection {
            connection.endpoint().map_err(McpError::Validation)?;
            server.connection = connection;
        }
        if let Some(auth_type) = update.auth_type {
            server.auth_type = auth_type;
        }
        if let Some(metadata) = update.metadata {
            server.metadata = metadata;
        }
        if let Some(creds) = &update.credentials {
            self.credentials.save(id, None, creds).await?;
        }

        server.updated_at = Utc::now();
        self.servers.update(&server).await.map_err(|e| match e {
            RepositoryError::Conflict(msg) => McpError::DuplicateServer(msg),
            other => McpError::Repository(other),
        })?;
        debug!(server_id = %id, "updated MCP server");
        self.get_server(id).await
    }

    /// Delete the server, then its vault entries (best-effort).
    pub async fn delete_server(&self, id: Uuid) -> Result<(), McpError> {
        self.get_server(id).await?;
        self.servers.delete(id).await?;
        if let Err(e) = self.credentials.delete(id).await {
            warn!(server_id = %id, "failed to delete server credentials: {e}");
        }
        info!(server_id = %id, "deleted MCP server");
        Ok(())
    }

    pub async fn activate_server(&self, id: Uuid) -> Result<McpServer, McpError> {
        self.set_active(id, true).await
    }

    pub async fn deactivate_server(&self, id: Uuid) -> Result<McpServer, McpError> {
        self.set_active(id, false).await
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<McpServer, McpError> {
        let server = self.get_server(id).await?;
        if server.is_active == active {
            return Ok(server);
        }
        self.servers.set_active(id, active).await?;
        info!(server_id = %id, active, "server activation changed");
        self.get_server(id).await
    }

    /// Administrative status override.
    pub async fn set_status(&self, id: Uuid, status: ServerStatus) -> Result<(), McpError> {
        self.get_server(id).await?;
        self.servers.set_status(id, status).await?;
        info!(server_id = %id, ?status, "server status overridden");
        Ok(())
    }

    pub async fn update_credentials(
        &self,
        id: Uuid,
        user_id: Option<Uuid>,
        credentials: &ServerCredentials,
    ) -> Result<(), McpError> {
        self.get_server(id).await?;
        self.credentials.save(id, user_id, credentials).await
    }

    // -------------------------------------------------------------------------
    // Health
    // -------------------------------------------------------------------------

    pub async fn check_server_health(&self, id: Uuid) -> Result<McpServerHealth, McpError> {
        let server = self.get_server(id).await?;
        let credentials = self.credentials.load(id, None).await?;
        self.probe(&server, credentials.as_ref()).await
    }

    /// Probe, persist the resulting status and append a history record.
    async fn probe(
        &self,
        server: &McpServer,
        credentials: Option<&ServerCredentials>,
    ) -> Result<McpServerHealth, McpError> {
        let timeout = server.connection.timeout();
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            timeout,
            self.client.send(&server.connection, credentials, McpRequest::Ping),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (status, response_time_ms, error_message) = match outcome {
            Ok(Ok(response)) if response.success => (ServerStatus::Online, elapsed_ms, None),
            Ok(Ok(response)) => (ServerStatus::Degraded, elapsed_ms, response.error),
            Ok(Err(ClientError::Rejected(msg))) => (ServerStatus::Degraded, elapsed_ms, Some(msg)),
            Ok(Err(ClientError::Connection(msg))) => (ServerStatus::Offline, elapsed_ms, Some(msg)),
            Ok(Err(ClientError::Timeout(_))) | Err(_) => (
                ServerStatus::Offline,
                timeout.as_millis() as u64,
                Some(format!("timed out after {}s", timeout.as_secs())),
            ),
            Ok(Err(e @ ClientError::Protocol(_))) => (ServerStatus::Error, elapsed_ms, Some(e.to_string())),
        };

        let health = McpServerHealth {
            id: new_id(),
            server_id: server.id,
            status,
            checked_at: Utc::now(),
            response_time_ms,
            error_message,
        };
        self.servers.record_health_check(&health).await?;
        debug!(
            server_id = %server.id,
            ?status,
            response_time_ms,
            "health probe recorded"
        );
        Ok(health)
    }

    /// Probe every active server concurrently, or one organization's when
    /// `organization_id` is set. Failures are reported per server.
    pub async fn check_all_servers_health(
        &self,
        organization_id: Option<Uuid>,
    ) -> Result<Vec<ServerHealthReport>, McpError> {
        let servers = match organization_id {
            Some(org) => self.servers.list(org, false).await?,
            None => self
                .servers
                .list_all()
                .await?
                .into_iter()
                .filter(|s| s.is_active)
                .collect(),
        };

        let checks = servers.into_iter().map(|server| async move {
            let result: Result<McpServerHealth, McpError> = async {
                let credentials = self.credentials.load(server.id, None).await?;
                self.probe(&server, credentials.as_ref()).await
            }
            .await;
            match result {
                Ok(health) => ServerHealthReport {
                    server_id: server.id,
                    server_name: server.name,
                    health: Some(health),
                    error: None,
                },
                Err(e) => {
                    error!(server_id = %server.id, "health check failed: {e}");
                    ServerHealthReport {
                        server_id: server.id,
                        server_name: server.name,
                        health: None,
                        error: Some(e.public_message()),
                    }
                }
            }
        });
        let reports = join_all(checks).await;
        let healthy = reports
            .iter()
            .filter(|r| r.health.as_ref().is_some_and(McpServerHealth::is_healthy))
            .count();
        info!(total = reports.len(), healthy, "health check sweep finished");
        Ok(reports)
    }

    pub async fn get_health_history(&self, id: Uuid, limit: Option<usize>) -> Result<Vec<McpServerHealth>, McpError> {
        Ok(self
            .servers
            .get_health_history(id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await?)
    }

    pub async fn get_statistics(&self, organization_id: Uuid) -> Result<ServerStatistics, McpError> {
        Ok(self.servers.get_statistics(organization_id).await?)
    }

    /// Run [`check_all_servers_health`](Self::check_all_servers_health) every
    /// `interval` until `cancel` fires.
    pub fn start_health_monitor(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("health monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = registry.check_all_servers_health(None).await {
                            warn!("health monitor sweep failed: {e}");
                        }
                    }
                }
            }
        })
    }

    // -------------------------------------------------------------------------
    // Capabilities
    // -------------------------------------------------------------------------

    /// Cached capabilities, refreshed when absent or stale.
    pub async fn get_server_capabilities(&self, id: Uuid) -> Result<CapabilitySnapshot, McpError> {
        let server = self.get_server(id).await?;
        let ttl = chrono::Duration::seconds(self.config.capability_ttl_secs);
        if let Some(snapshot) = server.capabilities
            && Utc::now() - snapshot.fetched_at < ttl
        {
            return Ok(snapshot);
        }
        self.refresh_server_capabilities(id).await
    }

    pub async fn refresh_server_capabilities(&self, id: Uuid) -> Result<CapabilitySnapshot, McpError> {
        let credentials = self.credentials.load(id, None).await?;
        self.fetch_capabilities(id, credentials.as_ref()).await
    }

    async fn fetch_capabilities(
        &self,
        id: Uuid,
        credentials: Option<&ServerCredentials>,
    ) -> Result<CapabilitySnapshot, McpError> {
        let server = self.get_server(id).await?;
        let timeout = server.connection.timeout();
        let response = tokio::time::timeout(
            timeout,
            self.client.send(&server.connection, credentials, McpRequest::ListTools),
        )
        .await
        .map_err(|_| McpError::Timeout(timeout.as_secs()))??;
        if !response.success {
            return Err(McpError::Upstream(
                response.error.unwrap_or_else(|| "tools/list failed".into()),
            ));
        }

        let snapshot = CapabilitySnapshot {
            tools: response.tools()?,
            fetched_at: Utc::now(),
        };
        self.servers.update_capabilities(id, &snapshot).await?;
        info!(server_id = %id, tools = snapshot.tools.len(), "capabilities refreshed");
        Ok(snapshot)
    }

    // -------------------------------------------------------------------------
    // Bulk
    // -------------------------------------------------------------------------

    /// Register each request independently and return the servers that made
    /// it. Failures are logged and skipped.
    pub async fn import_servers(
        &self,
        organization_id: Uuid,
        created_by: Option<Uuid>,
        requests: Vec<RegisterServerRequest>,
    ) -> Vec<McpServer> {
        let total = requests.len();
        let registrations = requests.into_iter().map(|request| async move {
            let name = request.name.clone();
            self.register_server(organization_id, created_by, request)
                .await
                .map_err(|e| (name, e))
        });
        let mut imported = Vec::new();
        for result in join_all(registrations).await {
            match result {
                Ok(server) => imported.push(server),
                Err((name, e)) => warn!(name = %name, "server import failed: {e}"),
            }
        }
        info!(total, imported = imported.len(), "server import finished");
        imported
    }

    pub async fn bulk_update(&self, updates: Vec<(Uuid, UpdateServerRequest)>) -> BulkOperationResult {
        let results = join_all(updates.into_iter().map(|(id, update)| async move {
            (id, self.update_server(id, update).await.map(|_| ()))
        }))
        .await;
        summarize("update", results)
    }

    pub async fn bulk_delete(&self, ids: Vec<Uuid>) -> BulkOperationResult {
        let results = join_all(
            ids.into_iter()
                .map(|id| async move { (id, self.delete_server(id).await) }),
        )
        .await;
        summarize("delete", results)
    }
}

fn summarize(operation: &str, results: Vec<(Uuid, Result<(), McpError>)>) -> BulkOperationResult {
    let mut summary = BulkOperationResult::default();
    for (id, result) in results {
        match result {
            Ok(()) => summary.succeeded += 1,
            Err(e) => {
                warn!(server_id = %id, operation, "bulk item failed: {e}");
                summary.failed += 1;
                summary.errors.push(BulkItemError {
                    item: id.to_string(),
                    error: e.public_message(),
                });
            }
        }
    }
    info!(
        operation,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "bulk operation finished"
    );
    summary
}

fn validate_registration(request: &RegisterServerRequest) -> Result<(), McpError> {
    if request.name.trim().is_empty() {
        return Err(McpError::Validation("name must not be blank".into()));
    }
    if request.connection.url.trim().is_empty() {
        return Err(McpError::Validation("url must not be blank".into()));
    }
    request.connection.endpoint().map_err(McpError::Validation)?;
    Ok(())
}

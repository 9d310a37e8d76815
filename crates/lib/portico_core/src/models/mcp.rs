//! MCP gateway domain models.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata key holding the per-server request limit per minute.
pub const RATE_LIMIT_METADATA_KEY: &str = "rateLimitPerMinute";

/// Default per-request timeout for servers (seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Enums
// =============================================================================

/// Server health status. Only health probes and admin overrides change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Unknown,
    Online,
    Offline,
    Degraded,
    Maintenance,
    Error,
}

impl ServerStatus {
    /// Online or Degraded.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Online | Self::Degraded)
    }
}

/// How the gateway authenticates to the upstream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthType {
    None,
    Bearer,
    ApiKey,
    Basic,
    OAuth,
}

/// Wire protocol for the upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Http,
    Https,
}

impl TransportProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

// =============================================================================
// Connection & credentials
// =============================================================================

/// Where and how to reach an upstream MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Host URL. May include scheme, port and path.
    pub url: String,
    #[serde(default = "default_protocol")]
    pub protocol: TransportProtocol,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub base_path: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_protocol() -> TransportProtocol {
    TransportProtocol::Https
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ConnectionInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocol: default_protocol(),
            port: None,
            base_path: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Compose the full endpoint URL.
    ///
    /// A scheme in `url` wins over `protocol`; `port` and `base_path`
    /// override what the URL carries.
    pub fn endpoint(&self) -> Result<url::Url, String> {
        let raw = self.url.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("{}://{raw}", self.protocol.scheme())
        };
        let mut url = url::Url::parse(&with_scheme).map_err(|e| format!("invalid url '{raw}': {e}"))?;
        if let Some(port) = self.port {
            url.set_port(Some(port))
                .map_err(|_| format!("cannot set port on '{raw}'"))?;
        }
        if let Some(base) = self.base_path.as_deref().filter(|p| !p.trim().is_empty()) {
            let path = format!("/{}", base.trim().trim_start_matches('/'));
            url.set_path(&path);
        }
        Ok(url)
    }
}

/// Credentials used to reach an upstream server. Stored only in the vault.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

impl ServerCredentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bearer_token.is_none()
            && self.api_key.is_none()
            && self.username.is_none()
            && self.custom_headers.is_empty()
    }
}

impl fmt::Debug for ServerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCredentials")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "***"))
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_key_header", &self.api_key_header)
            .field("username", &self.username)
            .field("custom_headers", &self.custom_headers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Server & capabilities
// =============================================================================

/// Tool definition reported by an upstream server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// Cached capability listing with its freshness timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySnapshot {
    pub tools: Vec<ToolDefinition>,
    pub fetched_at: DateTime<Utc>,
}

/// A registered upstream MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServer {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub connection: ConnectionInfo,
    pub auth_type: AuthType,
    pub status: ServerStatus,
    pub is_active: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub capabilities: Option<CapabilitySnapshot>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl McpServer {
    /// Per-minute request limit from metadata, if configured.
    pub fn rate_limit(&self) -> Option<u32> {
        self.metadata
            .get(RATE_LIMIT_METADATA_KEY)
            .and_then(|v| v.trim().parse().ok())
    }
}

/// Server registration input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterServerRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub connection: ConnectionInfo,
    #[serde(default = "default_auth_type")]
    pub auth_type: AuthType,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub credentials: Option<ServerCredentials>,
}

fn default_auth_type() -> AuthType {
    AuthType::None
}

impl RegisterServerRequest {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            connection: ConnectionInfo::new(url),
            auth_type: AuthType::None,
            metadata: HashMap::new(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, auth_type: AuthType, credentials: ServerCredentials) -> Self {
        self.auth_type = auth_type;
        self.credentials = Some(credentials);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Partial server update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServerRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub connection: Option<ConnectionInfo>,
    pub auth_type: Option<AuthType>,
    pub metadata: Option<HashMap<String, String>>,
    pub credentials: Option<ServerCredentials>,
}

// =============================================================================
// Health & statistics
// =============================================================================

/// One health probe record (append-only history).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerHealth {
    pub id: Uuid,
    pub server_id: Uuid,
    pub status: ServerStatus,
    pub checked_at: DateTime<Utc>,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
}

impl McpServerHealth {
    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

/// Per-server result of a fan-out health check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealthReport {
    pub server_id: Uuid,
    pub server_name: String,
    pub health: Option<McpServerHealth>,
    pub error: Option<String>,
}

/// Aggregate counts for an organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatistics {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub online: usize,
    pub offline: usize,
    pub degraded: usize,
    pub error: usize,
    pub unknown: usize,
    pub maintenance: usize,
    pub total_tools: usize,
}

impl ServerStatistics {
    pub fn record(&mut self, server: &McpServer) {
        self.total += 1;
        if server.is_active {
            self.active += 1;
        } else {
            self.inactive += 1;
        }
        match server.status {
            ServerStatus::Online => self.online += 1,
            ServerStatus::Offline => self.offline += 1,
            ServerStatus::Degraded => self.degraded += 1,
            ServerStatus::Error => self.error += 1,
            ServerStatus::Unknown => self.unknown += 1,
            ServerStatus::Maintenance => self.maintenance += 1,
        }
        self.total_tools += server.capabilities.as_ref().map_or(0, |c| c.tools.len());
    }
}

/// Aggregate result of a best-effort bulk operation.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationResult {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<BulkItemError>,
}

impl BulkOperationResult {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn none_succeeded(&self) -> bool {
        self.succeeded == 0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemError {
    pub item: String,
    pub error: String,
}

// =============================================================================
// Tool execution
// =============================================================================

/// A proxied tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    pub server_id: Uuid,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Option<serde_json::Map<String, serde_json::Value>>,
    /// Overrides the server timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ToolRequest {
    pub fn new(server_id: Uuid, tool_name: impl Into<String>) -> Self {
        Self {
            server_id,
            tool_name: tool_name.into(),
            arguments: None,
            timeout_secs: None,
        }
    }

    pub fn with_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = arguments.as_object().cloned();
        self
    }
}

/// Result of a proxied tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub success: bool,
    pub result: serde_json::Value,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_adds_scheme_port_and_path() {
        let mut conn = ConnectionInfo::new("tools.example.com");
        conn.port = Some(8443);
        conn.base_path = Some("mcp".into());
        assert_eq!(conn.endpoint().unwrap().as_str(), "https://tools.example.com:8443/mcp");
    }

    #[test]
    fn endpoint_keeps_explicit_scheme() {
        let mut conn = ConnectionInfo::new("http://localhost:3000/mcp");
        conn.protocol = TransportProtocol::Https;
        assert_eq!(conn.endpoint().unwrap().as_str(), "http://localhost:3000/mcp");
    }

    #[test]
    fn endpoint_rejects_garbage() {
        assert!(ConnectionInfo::new("http://exa mple").endpoint().is_err());
    }

    #[test]
    fn rate_limit_reads_metadata() {
        let req = RegisterServerRequest::new("s", "http://x").with_metadata(RATE_LIMIT_METADATA_KEY, " 12 ");
        let server = McpServer {
            id: Uuid::nil(),
            organization_id: Uuid::nil(),
            name: req.name,
            description: None,
            connection: req.connection,
            auth_type: AuthType::None,
            status: ServerStatus::Unknown,
            is_active: true,
            metadata: req.metadata,
            capabilities: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_health_check: None,
        };
        assert_eq!(server.rate_limit(), Some(12));
    }

    #[test]
    fn healthy_means_online_or_degraded() {
        assert!(ServerStatus::Online.is_healthy());
        assert!(ServerStatus::Degraded.is_healthy());
        assert!(!ServerStatus::Offline.is_healthy());
        assert!(!ServerStatus::Maintenance.is_healthy());
    }

    #[test]
    fn credential_debug_is_redacted() {
        let creds = ServerCredentials::bearer("tok-123");
        assert!(!format!("{creds:?}").contains("tok-123"));
    }
}

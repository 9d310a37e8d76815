//! Upstream MCP client abstraction and the rmcp-backed implementation.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use rmcp::ServiceExt;
use rmcp::model::{CallToolRequestParams, CallToolResult};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;

use crate::models::mcp::{ConnectionInfo, ServerCredentials, ToolDefinition};

/// Header used for API keys when the credentials name none.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// A request to an upstream server.
#[derive(Debug, Clone, PartialEq)]
pub enum McpRequest {
    /// Lightweight liveness probe.
    Ping,
    ListTools,
    CallTool {
        name: String,
        arguments: Option<Map<String, Value>>,
    },
}

/// Upstream reply. `success` is false when the server answered with a
/// tool-level error.
#[derive(Debug, Clone, PartialEq)]
pub struct McpResponse {
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl McpResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
            execution_time_ms: 0,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(error.into()),
            execution_time_ms: 0,
        }
    }

    /// Decode a `ListTools` result.
    pub fn tools(&self) -> Result<Vec<ToolDefinition>, ClientError> {
        serde_json::from_value(self.result.clone())
            .map_err(|e| ClientError::Protocol(format!("malformed tool listing: {e}")))
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered but refused the request (auth, HTTP error status).
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Transport used for probes, capability fetches and tool calls.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn send(
        &self,
        connection: &ConnectionInfo,
        credentials: Option<&ServerCredentials>,
        request: McpRequest,
    ) -> Result<McpResponse, ClientError>;
}

// =============================================================================
// rmcp implementation
// =============================================================================

/// Streamable HTTP client. Opens a session per request, injecting the
/// credentials as default headers on the underlying `reqwest` client.
#[derive(Debug, Default, Clone, Copy)]
pub struct RmcpClient;

impl RmcpClient {
    pub fn new() -> Self {
        Self
    }

    async fn connect(
        &self,
        connection: &ConnectionInfo,
        credentials: Option<&ServerCredentials>,
    ) -> Result<RunningService<RoleClient, ()>, ClientError> {
        let endpoint = connection.endpoint().map_err(ClientError::Protocol)?;
        let mut config = StreamableHttpClientTransportConfig::with_uri(endpoint.as_str());
        let header_map = match credentials {
            Some(creds) => {
                if let Some(token) = &creds.bearer_token {
                    // rmcp adds the "Bearer " prefix.
                    config.auth_header = Some(token.clone());
                }
                credential_headers(creds)?
            }
            None => HeaderMap::new(),
        };

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .timeout(connection.timeout())
            .build()
            .map_err(|e| ClientError::Connection(format!("failed to build HTTP client: {e}")))?;
        let transport = StreamableHttpClientTransport::with_client(client, config);

        ().serve(transport).await.map_err(|e| classify_connect_error(&e.to_string()))
    }

    async fn dispatch(
        service: &RunningService<RoleClient, ()>,
        request: McpRequest,
    ) -> Result<McpResponse, ClientError> {
        match request {
            McpRequest::Ping => {
                // A completed initialize handshake is the probe.
                let info = service.peer_info().map(|info| {
                    json!({
                        "serverName": info.server_info.name,
                        "serverVersion": info.server_info.version,
                        "protocolVersion": info.protocol_version.to_string(),
                    })
                });
                Ok(McpResponse::ok(info.unwrap_or(Value::Null)))
            }
            McpRequest::ListTools => {
                let tools: Vec<ToolDefinition> = service
                    .peer()
                    .list_all_tools()
                    .await
                    .map_err(|e| ClientError::Protocol(format!("tools/list failed: {e}")))?
                    .into_iter()
                    .map(|t| ToolDefinition {
                        name: t.name.to_string(),
                        description: t.description.as_deref().unwrap_or("").to_string(),
                        input_schema: Value::Object(t.input_schema.as_ref().clone()),
                    })
                    .collect();
                let result = serde_json::to_value(tools)
                    .map_err(|e| ClientError::Protocol(e.to_string()))?;
                Ok(McpResponse::ok(result))
            }
            McpRequest::CallTool { name, arguments } => {
                let params = CallToolRequestParams {
                    meta: None,
                    name: Cow::Owned(name),
                    arguments,
                    task: None,
                };
                let result = service
                    .peer()
                    .call_tool(params)
                    .await
                    .map_err(|e| ClientError::Protocol(format!("tool call failed: {e}")))?;
                let is_error = result.is_error.unwrap_or(false);
                let error = is_error.then(|| first_text(&result).unwrap_or_else(|| "tool reported an error".into()));
                Ok(McpResponse {
                    success: !is_error,
                    result: call_tool_result_to_json(&result),
                    error,
                    execution_time_ms: 0,
                })
            }
        }
    }
}

#[async_trait]
impl McpClient for RmcpClient {
    async fn send(
        &self,
        connection: &ConnectionInfo,
        credentials: Option<&ServerCredentials>,
        request: McpRequest,
    ) -> Result<McpResponse, ClientError> {
        let started = Instant::now();
        let timeout = connection.timeout();
        let work = async {
            let service = self.connect(connection, credentials).await?;
            let result = Self::dispatch(&service, request).await;
            service.cancellation_token().cancel();
            result
        };
        let mut response = tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;
        response.execution_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            url = %connection.url,
            success = response.success,
            elapsed_ms = response.execution_time_ms,
            "mcp request finished"
        );
        Ok(response)
    }
}

/// Default headers for a connection. A bearer token travels through the
/// transport config instead, and custom headers never replace whichever
/// authentication header is in effect.
fn credential_headers(creds: &ServerCredentials) -> Result<HeaderMap, ClientError> {
    let mut header_map = HeaderMap::new();
    let mut reserved = Vec::new();
    if creds.bearer_token.is_some() {
        reserved.push(AUTHORIZATION);
    } else {
        insert_auth_headers(&mut header_map, creds)?;
        reserved.extend(header_map.keys().cloned());
    }
    add_custom_headers(&mut header_map, &creds.custom_headers, &reserved);
    Ok(header_map)
}

/// API key, else basic auth.
fn insert_auth_headers(header_map: &mut HeaderMap, creds: &ServerCredentials) -> Result<(), ClientError> {
    if let Some(key) = &creds.api_key {
        let header = creds.api_key_header.as_deref().unwrap_or(DEFAULT_API_KEY_HEADER);
        let name = HeaderName::from_bytes(header.as_bytes())
            .map_err(|e| ClientError::Protocol(format!("invalid API key header name: {e}")))?;
        let value = HeaderValue::from_str(key)
            .map_err(|e| ClientError::Protocol(format!("invalid API key header value: {e}")))?;
        header_map.insert(name, value);
    } else if let (Some(user), Some(password)) = (&creds.username, &creds.password) {
        let encoded = STANDARD.encode(format!("{user}:{password}"));
        let value = HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(|e| ClientError::Protocol(format!("invalid basic auth value: {e}")))?;
        header_map.insert(AUTHORIZATION, value);
    }
    Ok(())
}

/// Add custom headers; entries that are not valid header names or values,
/// or that name a `reserved` header, are skipped.
fn add_custom_headers(header_map: &mut HeaderMap, headers: &HashMap<String, String>, reserved: &[HeaderName]) {
    for (k, v) in headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(k.as_bytes()),
            HeaderValue::from_str(v),
        ) else {
            continue;
        };
        if reserved.contains(&name) {
            debug!(header = %name, "custom header collides with authentication, skipped");
            continue;
        }
        header_map.insert(name, value);
    }
}

fn classify_connect_error(message: &str) -> ClientError {
    let lower = message.to_ascii_lowercase();
    let rejected = ["401", "403", "unauthorized", "forbidden", "status"]
        .iter()
        .any(|needle| lower.contains(needle));
    if rejected {
        ClientError::Rejected(message.to_string())
    } else {
        ClientError::Connection(message.to_string())
    }
}

fn first_text(result: &CallToolResult) -> Option<String> {
    use rmcp::model::RawContent;

    result.content.iter().find_map(|c| match &c.raw {
        RawContent::Text(text) => Some(text.text.clone()),
        _ => None,
    })
}

/// Convert a `CallToolResult` to a JSON value for our response.
fn call_tool_result_to_json(result: &CallToolResult) -> Value {
    use rmcp::model::RawContent;

    let content_values: Vec<Value> = result
        .content
        .iter()
        .map(|c| match &c.raw {
            RawContent::Text(text) => json!({
                "type": "text",
                "text": text.text,
            }),
            RawContent::Image(img) => json!({
                "type": "image",
                "data": img.data,
                "mimeType": img.mime_type,
            }),
            RawContent::Audio(audio) => json!({
                "type": "audio",
                "data": audio.data,
                "mimeType": audio.mime_type,
            }),
            RawContent::Resource(res) => json!({
                "type": "resource",
                "resource": res.resource,
            }),
            RawContent::ResourceLink(link) => json!({
                "type": "resource_link",
                "uri": link.uri,
                "name": link.name,
            }),
        })
        .collect();

    json!({
        "content": content_values,
        "isError": result.is_error.unwrap_or(false),
    })
}

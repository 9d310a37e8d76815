//! Tool-execution proxy.
//!
//! Every call passes, in order: server lookup, activity check, tenant check,
//! rate limit, `before_call` hooks, credential lookup, the upstream call,
//! audit and `after_call` hooks. Any rejection before the upstream call
//! means no credential is read and no traffic leaves the gateway.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::McpError;
use super::client::{McpClient, McpRequest};
use super::credentials::CredentialStore;
use super::hooks::{HookContext, HookPipeline, ToolCallOutcome};
use super::rate_limit::RateLimiter;
use crate::audit::{Auditor, Severity};
use crate::config::GatewayConfig;
use crate::models::mcp::{AuthType, ToolRequest, ToolResponse};
use crate::repository::McpServerRepository;

pub struct ToolProxy {
    servers: Arc<dyn McpServerRepository>,
    credentials: CredentialStore,
    client: Arc<dyn McpClient>,
    rate_limiter: RateLimiter,
    hooks: HookPipeline,
    auditor: Auditor,
    config: GatewayConfig,
}

impl std::fmt::Debug for ToolProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolProxy")
            .field("hooks", &self.hooks)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ToolProxy {
    pub fn new(
        servers: Arc<dyn McpServerRepository>,
        credentials: CredentialStore,
        client: Arc<dyn McpClient>,
        hooks: HookPipeline,
        auditor: Auditor,
        config: GatewayConfig,
    ) -> Self {
        Self {
            servers,
            credentials,
            client,
            rate_limiter: RateLimiter::new(Duration::from_secs(config.rate_limit_window_secs)),
            hooks,
            auditor,
            config,
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub async fn execute_tool(
        &self,
        request: ToolRequest,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<ToolResponse, McpError> {
        let server = self
            .servers
            .get_by_id(request.server_id)
            .await?
            .ok_or_else(|| McpError::NotFound(request.server_id.to_string()))?;
        if !server.is_active {
            return Err(McpError::Inactive(server.id));
        }

        if server.organization_id != organization_id {
            self.auditor
                .security_event(
                    Some(user_id),
                    "cross_tenant_tool_call",
                    Severity::High,
                    &format!("server {} requested from organization {organization_id}", server.id),
                )
                .await;
            return Err(McpError::Forbidden(format!(
                "server {} is not available to this organization",
                server.id
            )));
        }

        let limit = server.rate_limit().unwrap_or(self.config.default_rate_limit);
        if let Err(retry_after_secs) = self.rate_limiter.check(server.id, user_id, limit) {
            warn!(server_id = %server.id, %user_id, limit, "rate limit exceeded");
            return Err(McpError::RateLimitExceeded { retry_after_secs });
        }

        let ctx = HookContext {
            user_id,
            organization_id,
            server_id: server.id,
            tool_name: request.tool_name.clone(),
            timestamp: Utc::now(),
        };
        let mut arguments = Value::Object(request.arguments.unwrap_or_default());
        if let Err(e) = self.hooks.run_before(&ctx, &mut arguments).await {
            self.auditor
                .tool_execution(
                    user_id,
                    server.id,
                    &request.tool_name,
                    false,
                    Some(json!({ "rejectedBy": "hook", "error": e.to_string() })),
                )
                .await;
            return Err(e.into());
        }

        let credentials = self.credentials.load(server.id, Some(user_id)).await?;
        if credentials.is_none() && server.auth_type != AuthType::None {
            return Err(McpError::MissingCredentials(server.id));
        }

        let timeout = request
            .timeout_secs
            .map(|s| Duration::from_secs(s.max(1)))
            .unwrap_or_else(|| server.connection.timeout());
        let call = McpRequest::CallTool {
            name: request.tool_name.clone(),
            arguments: match arguments {
                Value::Object(map) => Some(map),
                _ => None,
            },
        };
        let started = Instant::now();
        let result = match tokio::time::timeout(
            timeout,
            self.client.send(&server.connection, credentials.as_ref(), call),
        )
        .await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(McpError::from(e)),
            Err(_) => Err(McpError::Timeout(timeout.as_secs())),
        };
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let mut outcome = match &result {
            Ok(response) if response.success => ToolCallOutcome::Success(response.result.clone()),
            Ok(response) => ToolCallOutcome::Error(
                response
                    .error
                    .clone()
                    .unwrap_or_else(|| "tool reported an error".into()),
            ),
            Err(e) => ToolCallOutcome::Error(e.to_string()),
        };

        self.auditor
            .tool_execution(
                user_id,
                server.id,
                &request.tool_name,
                outcome.is_success(),
                Some(json!({
                    "executionTimeMs": execution_time_ms,
                    "error": match &outcome {
                        ToolCallOutcome::Error(msg) => Some(msg.as_str()),
                        ToolCallOutcome::Success(_) => None,
                    },
                })),
            )
            .await;

        self.hooks.run_after(&ctx, &mut outcome).await?;

        if let Err(e) = result {
            error!(
                server_id = %server.id,
                tool = %request.tool_name,
                execution_time_ms,
                "tool execution failed: {e}"
            );
            return Err(e);
        }

        debug!(
            server_id = %server.id,
            tool = %request.tool_name,
            execution_time_ms,
            success = outcome.is_success(),
            "tool executed"
        );
        Ok(match outcome {
            ToolCallOutcome::Success(result) => ToolResponse {
                success: true,
                result,
                error: None,
                execution_time_ms,
            },
            ToolCallOutcome::Error(error) => ToolResponse {
                success: false,
                result: Value::Null,
                error: Some(error),
                execution_time_ms,
            },
        })
    }
}

//! Authorization hook: the caller needs `execute` on `mcp_servers:{id}`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{HookContext, HookError, ToolCallOutcome, ToolHook};
use crate::authz::AuthorizationEngine;
use crate::models::authz::AuthorizationContext;

/// Resource prefix for server permissions.
pub const SERVER_RESOURCE: &str = "mcp_servers";
pub const EXECUTE_ACTION: &str = "execute";

pub fn server_resource(server_id: uuid::Uuid) -> String {
    format!("{SERVER_RESOURCE}:{server_id}")
}

pub struct AuthorizationHook {
    engine: Arc<AuthorizationEngine>,
}

impl AuthorizationHook {
    pub fn new(engine: Arc<AuthorizationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ToolHook for AuthorizationHook {
    async fn before_call(&self, ctx: &HookContext, _arguments: &mut serde_json::Value) -> Result<(), HookError> {
        let resource = server_resource(ctx.server_id);
        let authz_ctx = AuthorizationContext::default()
            .with_claim("org", ctx.organization_id.to_string())
            .with_claim("tool", ctx.tool_name.clone());
        let allowed = self
            .engine
            .authorize(ctx.user_id, &resource, EXECUTE_ACTION, Some(&authz_ctx))
            .await
            .map_err(|e| HookError::Internal(format!("authorization check failed: {e}")))?;
        if !allowed {
            debug!(user_id = %ctx.user_id, %resource, "tool call denied by permissions");
            return Err(HookError::AccessDenied(format!(
                "user {} may not execute tools on server {}",
                ctx.user_id, ctx.server_id
            )));
        }
        Ok(())
    }

    async fn after_call(&self, _ctx: &HookContext, _outcome: &mut ToolCallOutcome) -> Result<(), HookError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "AuthorizationHook"
    }
}

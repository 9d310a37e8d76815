//! Hook pipeline around proxied tool calls.
//!
//! Hooks run `before_call` in registration order and `after_call` in reverse
//! order (onion model). A `before_call` error rejects the call before any
//! credential lookup or upstream traffic.

pub mod authorization;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use authorization::AuthorizationHook;

/// Per-call context handed to every hook.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub server_id: Uuid,
    pub tool_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Calls a hook applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookScope {
    Global,
    Server(Uuid),
    User(Uuid),
    UserServer(Uuid, Uuid),
}

impl HookScope {
    pub fn matches(&self, ctx: &HookContext) -> bool {
        match self {
            Self::Global => true,
            Self::Server(id) => ctx.server_id == *id,
            Self::User(uid) => ctx.user_id == *uid,
            Self::UserServer(uid, sid) => ctx.user_id == *uid && ctx.server_id == *sid,
        }
    }
}

/// Outcome of a tool call, passed to `after_call` hooks.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallOutcome {
    Success(serde_json::Value),
    Error(String),
}

impl ToolCallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Hook error: {0}")]
    Internal(String),
}

#[async_trait]
pub trait ToolHook: Send + Sync {
    /// Runs before the upstream call. `Err` rejects the call; `arguments`
    /// may be rewritten.
    async fn before_call(&self, ctx: &HookContext, arguments: &mut serde_json::Value) -> Result<(), HookError>;

    /// Runs after the upstream call and may rewrite the outcome.
    async fn after_call(&self, ctx: &HookContext, outcome: &mut ToolCallOutcome) -> Result<(), HookError>;

    fn name(&self) -> &str;
}

/// Ordered, scoped hooks.
#[derive(Default)]
pub struct HookPipeline {
    hooks: Vec<(HookScope, Arc<dyn ToolHook>)>,
}

impl std::fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|(scope, hook)| (scope, hook.name())))
            .finish()
    }
}

impl HookPipeline {
    pub fn new(hooks: Vec<(HookScope, Arc<dyn ToolHook>)>) -> Self {
        Self { hooks }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scope: HookScope, hook: Arc<dyn ToolHook>) {
        self.hooks.push((scope, hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run matching `before_call` hooks in order, stopping at the first error.
    pub async fn run_before(&self, ctx: &HookContext, arguments: &mut serde_json::Value) -> Result<(), HookError> {
        for (scope, hook) in &self.hooks {
            if scope.matches(ctx) {
                hook.before_call(ctx, arguments).await?;
            }
        }
        Ok(())
    }

    /// Run matching `after_call` hooks in reverse order.
    pub async fn run_after(&self, ctx: &HookContext, outcome: &mut ToolCallOutcome) -> Result<(), HookError> {
        for (scope, hook) in self.hooks.iter().rev() {
            if scope.matches(ctx) {
                hook.after_call(ctx, outcome).await?;
            }
        }
        Ok(())
    }
}

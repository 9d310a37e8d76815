//! Audit sink abstraction.
//!
//! The core reports authentication, tool-execution and security events to an
//! [`AuditSink`]. Audit is fire-and-forget: [`Auditor`] logs sink failures
//! with `warn!` and never lets them fail the primary operation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Security event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Error reported by a sink implementation.
#[derive(Debug, thiserror::Error)]
#[error("Audit sink error: {0}")]
pub struct AuditError(pub String);

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_authentication(
        &self,
        user_id: Option<Uuid>,
        action: &str,
        success: bool,
        ip_address: Option<&str>,
    ) -> Result<(), AuditError>;

    async fn log_mcp_tool_execution(
        &self,
        user_id: Uuid,
        server_id: Uuid,
        tool_name: &str,
        success: bool,
        details: Option<serde_json::Value>,
    ) -> Result<(), AuditError>;

    async fn log_security_event(
        &self,
        user_id: Option<Uuid>,
        event_type: &str,
        severity: Severity,
        details: &str,
    ) -> Result<(), AuditError>;
}

/// Fire-and-forget wrapper around a sink.
#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Auditor that writes to `tracing`.
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }

    pub async fn authentication(
        &self,
        user_id: Option<Uuid>,
        action: &str,
        success: bool,
        ip_address: Option<&str>,
    ) {
        if let Err(e) = self
            .sink
            .log_authentication(user_id, action, success, ip_address)
            .await
        {
            warn!(action, "failed to record authentication audit event: {e}");
        }
    }

    pub async fn tool_execution(
        &self,
        user_id: Uuid,
        server_id: Uuid,
        tool_name: &str,
        success: bool,
        details: Option<serde_json::Value>,
    ) {
        if let Err(e) = self
            .sink
            .log_mcp_tool_execution(user_id, server_id, tool_name, success, details)
            .await
        {
            warn!(tool = tool_name, %server_id, "failed to record tool audit event: {e}");
        }
    }

    pub async fn security_event(
        &self,
        user_id: Option<Uuid>,
        event_type: &str,
        severity: Severity,
        details: &str,
    ) {
        if let Err(e) = self
            .sink
            .log_security_event(user_id, event_type, severity, details)
            .await
        {
            warn!(event_type, "failed to record security audit event: {e}");
        }
    }
}

impl std::fmt::Debug for Auditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auditor").finish_non_exhaustive()
    }
}

/// Writes audit events as `tracing` records under target `portico::audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log_authentication(
        &self,
        user_id: Option<Uuid>,
        action: &str,
        success: bool,
        ip_address: Option<&str>,
    ) -> Result<(), AuditError> {
        info!(
            target: "portico::audit",
            user_id = ?user_id,
            action,
            success,
            ip = ip_address.unwrap_or("-"),
            "authentication"
        );
        Ok(())
    }

    async fn log_mcp_tool_execution(
        &self,
        user_id: Uuid,
        server_id: Uuid,
        tool_name: &str,
        success: bool,
        details: Option<serde_json::Value>,
    ) -> Result<(), AuditError> {
        info!(
            target: "portico::audit",
            %user_id,
            %server_id,
            tool = tool_name,
            success,
            details = %details.unwrap_or(serde_json::Value::Null),
            "tool_execution"
        );
        Ok(())
    }

    async fn log_security_event(
        &self,
        user_id: Option<Uuid>,
        event_type: &str,
        severity: Severity,
        details: &str,
    ) -> Result<(), AuditError> {
        warn!(
            target: "portico::audit",
            user_id = ?user_id,
            event_type,
            severity = severity.as_str(),
            details,
            "security_event"
        );
        Ok(())
    }
}

/// Recorded audit event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    Authentication {
        user_id: Option<Uuid>,
        action: String,
        success: bool,
        ip_address: Option<String>,
        at: DateTime<Utc>,
    },
    ToolExecution {
        user_id: Uuid,
        server_id: Uuid,
        tool_name: String,
        success: bool,
        details: Option<serde_json::Value>,
        at: DateTime<Utc>,
    },
    Security {
        user_id: Option<Uuid>,
        event_type: String,
        severity: Severity,
        details: String,
        at: DateTime<Utc>,
    },
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Authentication actions recorded so far, in order, with their outcome.
    pub fn authentication_actions(&self) -> Vec<(String, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::Authentication { action, success, .. } => Some((action, success)),
                _ => None,
            })
            .collect()
    }

    pub fn tool_executions(&self) -> Vec<(String, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::ToolExecution {
                    tool_name, success, ..
                } => Some((tool_name, success)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|e| AuditError(format!("poisoned: {e}")))?
            .push(event);
        Ok(())
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn log_authentication(
        &self,
        user_id: Option<Uuid>,
        action: &str,
        success: bool,
        ip_address: Option<&str>,
    ) -> Result<(), AuditError> {
        self.push(AuditEvent::Authentication {
            user_id,
            action: action.to_string(),
            success,
            ip_address: ip_address.map(str::to_string),
            at: Utc::now(),
        })
    }

    async fn log_mcp_tool_execution(
        &self,
        user_id: Uuid,
        server_id: Uuid,
        tool_name: &str,
        success: bool,
        details: Option<serde_json::Value>,
    ) -> Result<(), AuditError> {
        self.push(AuditEvent::ToolExecution {
            user_id,
            server_id,
            tool_name: tool_name.to_string(),
            success,
            details,
            at: Utc::now(),
        })
    }

    async fn log_security_event(
        &self,
        user_id: Option<Uuid>,
        event_type: &str,
        severity: Severity,
        details: &str,
    ) -> Result<(), AuditError> {
        self.push(AuditEvent::Security {
            user_id,
            event_type: event_type.to_string(),
            severity,
            details: details.to_string(),
            at: Utc::now(),
        })
    }
}

//! Authorization domain models.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::new_id;

/// Permission effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// A resource/action grant or denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: Uuid,
    /// Resource pattern: exact, `*`, or `scope:*`.
    pub resource: String,
    /// Action pattern: exact, `*`, or a comma-separated list.
    pub action: String,
    pub effect: Effect,
    /// Pins the permission to one resource instance.
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub conditions: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: impl Into<String>, effect: Effect) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            resource: resource.into(),
            action: action.into(),
            effect,
            resource_id: None,
            conditions: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn allow(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(resource, action, Effect::Allow)
    }

    pub fn deny(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(resource, action, Effect::Deny)
    }

    pub fn for_instance(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_condition(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }
}

/// A permission attached directly to a user, optionally time-limited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPermission {
    pub permission: Permission,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Claim-driven policy, evaluated independently of permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicy {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub required_claims: HashMap<String, String>,
    #[serde(default)]
    pub allowed_resources: Vec<String>,
    #[serde(default)]
    pub allowed_actions: Vec<String>,
    #[serde(default)]
    pub conditions: HashMap<String, String>,
}

impl AuthorizationPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            enabled: true,
            required_claims: HashMap::new(),
            allowed_resources: Vec::new(),
            allowed_actions: Vec::new(),
            conditions: HashMap::new(),
        }
    }
}

/// Request-scoped facts consulted by conditions and policies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationContext {
    /// Hour of day (0-23) used by time-of-day conditions.
    pub current_hour: Option<u32>,
    pub ip_address: Option<String>,
    #[serde(default)]
    pub claims: HashMap<String, String>,
    /// Target resource instance, when the check is instance-scoped.
    pub resource_id: Option<String>,
}

impl AuthorizationContext {
    pub fn with_hour(mut self, hour: u32) -> Self {
        self.current_hour = Some(hour);
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }
}

/// Resource/action pair evaluated against policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRequest {
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub context: AuthorizationContext,
}

/// Outcome of a permission evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reason: String,
    pub matched_permission: Option<Permission>,
}

impl PermissionDecision {
    pub fn allow(reason: impl Into<String>, permission: Permission) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            matched_permission: Some(permission),
        }
    }

    pub fn deny(reason: impl Into<String>, permission: Option<Permission>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            matched_permission: permission,
        }
    }
}

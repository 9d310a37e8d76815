//! Permission and policy evaluation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use tracing::debug;
use uuid::Uuid;

use super::AuthzError;
use super::condition::all_pass;
use super::matching::{action_matches, resource_matches};
use crate::models::authz::{
    AuthorizationContext, AuthorizationPolicy, Effect, Permission, PermissionDecision, PolicyRequest,
};
use crate::repository::PermissionRepository;

#[derive(Clone)]
pub struct AuthorizationEngine {
    permissions: Arc<dyn PermissionRepository>,
}

impl std::fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationEngine").finish_non_exhaustive()
    }
}

impl AuthorizationEngine {
    pub fn new(permissions: Arc<dyn PermissionRepository>) -> Self {
        Self { permissions }
    }

    /// Direct grants (unexpired) plus every role's permissions, deduplicated
    /// by permission id.
    pub async fn get_effective_permissions(&self, user_id: Uuid) -> Result<Vec<Permission>, AuthzError> {
        let now = Utc::now();
        let direct = self.permissions.get_user_permissions(user_id).await?;
        let roles = self.permissions.get_user_roles(user_id).await?;
        let role_sets = try_join_all(
            roles
                .iter()
                .map(|role| self.permissions.get_role_permissions(*role)),
        )
        .await?;

        let mut seen = HashSet::new();
        let mut effective = Vec::new();
        let direct = direct
            .into_iter()
            .filter(|g| g.expires_at.is_none_or(|at| at > now))
            .map(|g| g.permission);
        for permission in direct.chain(role_sets.into_iter().flatten()) {
            if seen.insert(permission.id) {
                effective.push(permission);
            }
        }
        Ok(effective)
    }

    pub async fn evaluate_permission(
        &self,
        user_id: Uuid,
        resource: &str,
        action: &str,
        ctx: &AuthorizationContext,
    ) -> Result<PermissionDecision, AuthzError> {
        let permissions = self.get_effective_permissions(user_id).await?;
        let decision = decide(&permissions, resource, action, ctx);
        debug!(
            %user_id,
            resource,
            action,
            allowed = decision.allowed,
            reason = %decision.reason,
            "permission evaluated"
        );
        Ok(decision)
    }

    pub async fn authorize(
        &self,
        user_id: Uuid,
        resource: &str,
        action: &str,
        ctx: Option<&AuthorizationContext>,
    ) -> Result<bool, AuthzError> {
        let default_ctx = AuthorizationContext::default();
        let ctx = ctx.unwrap_or(&default_ctx);
        Ok(self
            .evaluate_permission(user_id, resource, action, ctx)
            .await?
            .allowed)
    }

    /// Check against one resource instance. Permissions pinned to
    /// `resource_id` are considered first, then general ones.
    pub async fn authorize_resource(
        &self,
        user_id: Uuid,
        resource_type: &str,
        resource_id: &str,
        action: &str,
    ) -> Result<bool, AuthzError> {
        let ctx = AuthorizationContext {
            resource_id: Some(resource_id.to_string()),
            ..AuthorizationContext::default()
        };
        self.authorize(user_id, resource_type, action, Some(&ctx)).await
    }

    /// Evaluate the repository's policies against `request`.
    pub async fn authorize_with_policies(&self, request: &PolicyRequest) -> Result<bool, AuthzError> {
        let policies = self.permissions.list_policies().await?;
        Ok(evaluate_policies(request, &policies))
    }
}

/// Deny precedence, then the first applicable Allow (pinned before general)
/// subject to its conditions, else deny by default.
pub fn decide(
    permissions: &[Permission],
    resource: &str,
    action: &str,
    ctx: &AuthorizationContext,
) -> PermissionDecision {
    let mut matching: Vec<&Permission> = permissions
        .iter()
        .filter(|p| applies(p, resource, action, ctx))
        .collect();

    if let Some(deny) = matching.iter().find(|p| p.effect == Effect::Deny) {
        return PermissionDecision::deny("explicit deny", Some((*deny).clone()));
    }

    matching.sort_by_key(|p| p.resource_id.is_none());
    match matching.first() {
        Some(allow) if all_pass(&allow.conditions, ctx) => {
            PermissionDecision::allow("permission granted", (*allow).clone())
        }
        Some(allow) => PermissionDecision::deny("permission conditions not met", Some((*allow).clone())),
        None => PermissionDecision::deny("no matching permission", None),
    }
}

fn applies(permission: &Permission, resource: &str, action: &str, ctx: &AuthorizationContext) -> bool {
    if !resource_matches(&permission.resource, resource) || !action_matches(&permission.action, action) {
        return false;
    }
    match &permission.resource_id {
        Some(pinned) => ctx.resource_id.as_deref() == Some(pinned.as_str()),
        None => true,
    }
}

/// True on the first enabled policy whose claims, allow-lists and
/// conditions all match.
pub fn evaluate_policies(request: &PolicyRequest, policies: &[AuthorizationPolicy]) -> bool {
    policies
        .iter()
        .filter(|p| p.enabled)
        .any(|p| policy_matches(p, request))
}

fn policy_matches(policy: &AuthorizationPolicy, request: &PolicyRequest) -> bool {
    let ctx = &request.context;
    let claims_ok = policy
        .required_claims
        .iter()
        .all(|(k, v)| ctx.claims.get(k) == Some(v));
    let resource_ok = policy
        .allowed_resources
        .iter()
        .any(|r| resource_matches(r, &request.resource));
    let action_ok = policy
        .allowed_actions
        .iter()
        .any(|a| action_matches(a, &request.action));
    claims_ok && resource_ok && action_ok && all_pass(&policy.conditions, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_wins_in_either_order() {
        let ctx = AuthorizationContext::default();
        let allow = Permission::allow("reports", "read");
        let deny = Permission::deny("reports", "read");
        assert!(!decide(&[allow.clone(), deny.clone()], "reports", "read", &ctx).allowed);
        assert!(!decide(&[deny, allow], "reports", "read", &ctx).allowed);
    }

    #[test]
    fn default_is_deny() {
        let d = decide(&[], "reports", "read", &AuthorizationContext::default());
        assert!(!d.allowed);
        assert!(d.matched_permission.is_none());
    }

    #[test]
    fn allow_conditions_gate_the_grant() {
        let perm = Permission::allow("reports", "read").with_condition("timeOfDay", "business_hours");
        let perms = [perm];
        let day = AuthorizationContext::default().with_hour(10);
        let night = AuthorizationContext::default().with_hour(22);
        assert!(decide(&perms, "reports", "read", &day).allowed);
        let d = decide(&perms, "reports", "read", &night);
        assert!(!d.allowed);
        assert_eq!(d.reason, "permission conditions not met");
    }

    #[test]
    fn pinned_permission_only_applies_to_its_instance() {
        let perms = [Permission::allow("documents", "edit").for_instance("doc-7")];
        let mut ctx = AuthorizationContext::default();
        assert!(!decide(&perms, "documents", "edit", &ctx).allowed);
        ctx.resource_id = Some("doc-7".into());
        assert!(decide(&perms, "documents", "edit", &ctx).allowed);
        ctx.resource_id = Some("doc-8".into());
        assert!(!decide(&perms, "documents", "edit", &ctx).allowed);
    }

    #[test]
    fn pinned_allow_is_preferred_over_general() {
        let general = Permission::allow("documents", "edit").with_condition("ipRange", "10.0.0.0/8");
        let pinned = Permission::allow("documents", "edit").for_instance("doc-7");
        let ctx = AuthorizationContext {
            resource_id: Some("doc-7".into()),
            ..Default::default()
        };
        let d = decide(&[general, pinned.clone()], "documents", "edit", &ctx);
        assert!(d.allowed);
        assert_eq!(d.matched_permission.unwrap().id, pinned.id);
    }

    #[test]
    fn policies_need_claims_and_allow_lists() {
        let mut policy = AuthorizationPolicy::new("finance-readers");
        policy.required_claims.insert("department".into(), "finance".into());
        policy.allowed_resources.push("reports:*".into());
        policy.allowed_actions.push("read".into());

        let request = |dept: &str, action: &str| PolicyRequest {
            resource: "reports:q3".into(),
            action: action.into(),
            context: AuthorizationContext::default().with_claim("department", dept),
        };
        assert!(evaluate_policies(&request("finance", "read"), &[policy.clone()]));
        assert!(!evaluate_policies(&request("sales", "read"), &[policy.clone()]));
        assert!(!evaluate_policies(&request("finance", "write"), &[policy.clone()]));

        policy.enabled = false;
        assert!(!evaluate_policies(&request("finance", "read"), &[policy]));
    }
}

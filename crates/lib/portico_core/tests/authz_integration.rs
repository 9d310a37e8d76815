//! Permission evaluation over direct grants and role grants.

use std::sync::Arc;

use portico_core::authz::AuthorizationEngine;
use portico_core::models::authz::{AuthorizationContext, Permission};
use portico_core::repository::PermissionRepository;
use portico_core::repository::memory::InMemoryPermissionRepository;
use uuid::Uuid;

struct Harness {
    engine: AuthorizationEngine,
    repo: Arc<InMemoryPermissionRepository>,
}

fn harness() -> Harness {
    let repo = Arc::new(InMemoryPermissionRepository::new());
    Harness {
        engine: AuthorizationEngine::new(repo.clone()),
        repo,
    }
}

impl Harness {
    async fn grant(&self, user: Uuid, permission: Permission) {
        let permission = self.repo.create_permission(permission).await.unwrap();
        self.repo
            .assign_permission_to_user(user, permission.id, None)
            .await
            .unwrap();
    }

    async fn grant_via_role(&self, user: Uuid, permissions: Vec<Permission>) {
        let role = Uuid::new_v4();
        let mut ids = Vec::new();
        for permission in permissions {
            ids.push(self.repo.create_permission(permission).await.unwrap().id);
        }
        self.repo.set_role_permissions(role, &ids).await.unwrap();
        self.repo.assign_role_to_user(user, role).await.unwrap();
    }

    async fn allowed(&self, user: Uuid, resource: &str, action: &str) -> bool {
        self.engine.authorize(user, resource, action, None).await.unwrap()
    }
}

#[tokio::test]
async fn deny_wins_in_either_grant_order() {
    let h = harness();
    let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

    h.grant(first, Permission::allow("reports", "read")).await;
    h.grant(first, Permission::deny("reports", "read")).await;
    h.grant(second, Permission::deny("reports", "read")).await;
    h.grant(second, Permission::allow("reports", "read")).await;

    assert!(!h.allowed(first, "reports", "read").await);
    assert!(!h.allowed(second, "reports", "read").await);
}

#[tokio::test]
async fn role_deny_overrides_direct_allow() {
    let h = harness();
    let user = Uuid::new_v4();
    h.grant(user, Permission::allow("*", "*")).await;
    h.grant_via_role(user, vec![Permission::deny("billing:*", "delete")]).await;

    assert!(h.allowed(user, "billing:invoices", "read").await);
    assert!(!h.allowed(user, "billing:invoices", "delete").await);
}

#[tokio::test]
async fn scoped_wildcard_stays_inside_its_scope() {
    let h = harness();
    let user = Uuid::new_v4();
    h.grant(user, Permission::allow("organizations:*", "read,update")).await;

    assert!(h.allowed(user, "organizations:42", "read").await);
    assert!(h.allowed(user, "organizations:42", "update").await);
    assert!(!h.allowed(user, "organizations:42", "delete").await);
    assert!(!h.allowed(user, "users:42", "read").await);
}

#[tokio::test]
async fn no_grants_means_no_access() {
    let h = harness();
    assert!(!h.allowed(Uuid::new_v4(), "reports", "read").await);
}

#[tokio::test]
async fn conditional_allow_needs_its_claim() {
    let h = harness();
    let user = Uuid::new_v4();
    h.grant(
        user,
        Permission::allow("reports", "read").with_condition("claim:department", "finance"),
    )
    .await;

    let finance = AuthorizationContext::default().with_claim("department", "finance");
    let sales = AuthorizationContext::default().with_claim("department", "sales");
    assert!(h.engine.authorize(user, "reports", "read", Some(&finance)).await.unwrap());
    assert!(!h.engine.authorize(user, "reports", "read", Some(&sales)).await.unwrap());
    assert!(!h.allowed(user, "reports", "read").await);
}

#[tokio::test]
async fn pinned_permission_applies_to_its_instance_only() {
    let h = harness();
    let user = Uuid::new_v4();
    h.grant(user, Permission::allow("projects", "write").for_instance("p-1")).await;

    assert!(h.engine.authorize_resource(user, "projects", "p-1", "write").await.unwrap());
    assert!(!h.engine.authorize_resource(user, "projects", "p-2", "write").await.unwrap());
}

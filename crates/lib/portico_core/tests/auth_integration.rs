//! Login, lockout, MFA and session rotation against the in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portico_core::audit::{Auditor, MemoryAuditSink};
use portico_core::auth::{AuthError, AuthService, totp};
use portico_core::config::AuthConfig;
use portico_core::models::auth::{LoginOutcome, RegisterRequest, User};
use portico_core::repository::memory::InMemoryUserRepository;
use portico_core::repository::{RepoResult, UserRepository};
use portico_core::{ClassifiedError, ErrorKind};
use uuid::Uuid;

const EMAIL: &str = "grace@example.com";
const PASSWORD: &str = "C0bol!forever";

struct Harness {
    auth: AuthService,
    audit: Arc<MemoryAuditSink>,
    user_id: Uuid,
}

/// User store whose lookups by id stall, so concurrent callers interleave
/// between reading a user and writing it back.
struct SlowReads(InMemoryUserRepository);

#[async_trait]
impl UserRepository for SlowReads {
    async fn get_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        self.0.get_by_email(email).await
    }

    async fn get_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        let user = self.0.get_by_id(id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        user
    }

    async fn create(&self, user: User) -> RepoResult<User> {
        self.0.create(user).await
    }

    async fn update(&self, user: &User) -> RepoResult<()> {
        self.0.update(user).await
    }

    async fn consume_backup_code(&self, id: Uuid, code_hash: &str) -> RepoResult<Option<usize>> {
        self.0.consume_backup_code(id, code_hash).await
    }

    async fn increment_failed_login_attempts(&self, id: Uuid) -> RepoResult<u32> {
        self.0.increment_failed_login_attempts(id).await
    }

    async fn reset_failed_login_attempts(&self, id: Uuid) -> RepoResult<()> {
        self.0.reset_failed_login_attempts(id).await
    }

    async fn lock_user(&self, id: Uuid, until: DateTime<Utc>) -> RepoResult<()> {
        self.0.lock_user(id, until).await
    }

    async fn unlock_user(&self, id: Uuid) -> RepoResult<()> {
        self.0.unlock_user(id).await
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<()> {
        self.0.update_last_login(id, at).await
    }

    async fn get_roles(&self, id: Uuid) -> RepoResult<Vec<String>> {
        self.0.get_roles(id).await
    }
}

async fn harness(config: AuthConfig) -> Harness {
    harness_with(config, Arc::new(InMemoryUserRepository::new())).await
}

async fn harness_with(config: AuthConfig, users: Arc<dyn UserRepository>) -> Harness {
    let audit = Arc::new(MemoryAuditSink::new());
    let auth = AuthService::new(config, users, Auditor::new(audit.clone()));
    let user = auth
        .register(RegisterRequest {
            organization_id: Uuid::new_v4(),
            email: EMAIL.into(),
            password: PASSWORD.into(),
            name: Some("Grace".into()),
        })
        .await
        .unwrap();
    Harness {
        auth,
        audit,
        user_id: user.id,
    }
}

#[tokio::test]
async fn correct_password_is_refused_once_locked() {
    let h = harness(AuthConfig {
        max_failed_logins: 3,
        ..AuthConfig::with_secret("auth-integration")
    })
    .await;

    for _ in 0..3 {
        let err = h.auth.login(EMAIL, "wrong", None).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }
    let err = h.auth.login(EMAIL, PASSWORD, None).await.unwrap_err();
    assert!(matches!(err, AuthError::Locked { remaining_minutes } if remaining_minutes >= 1));
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    h.auth.unlock_user(h.user_id).await.unwrap();
    assert!(!h.auth.login(EMAIL, PASSWORD, None).await.unwrap().requires_mfa());
}

#[tokio::test]
async fn refresh_tokens_are_single_use() {
    let h = harness(AuthConfig::with_secret("auth-integration")).await;
    let outcome = h.auth.login(EMAIL, PASSWORD, None).await.unwrap();
    let first = outcome.tokens().unwrap().clone();

    let second = h.auth.refresh_token(&first.refresh_token).await.unwrap();
    assert_ne!(second.refresh_token, first.refresh_token);
    assert!(h.auth.validate_access_token(&second.access_token).is_ok());

    let err = h.auth.refresh_token(&first.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidRefreshToken));
    assert!(h.auth.refresh_token(&second.refresh_token).await.is_ok());
}

#[tokio::test]
async fn logout_all_ends_every_session() {
    let h = harness(AuthConfig::with_secret("auth-integration")).await;
    let a = h.auth.login(EMAIL, PASSWORD, None).await.unwrap().tokens().unwrap().clone();
    let b = h.auth.login(EMAIL, PASSWORD, None).await.unwrap().tokens().unwrap().clone();

    assert_eq!(h.auth.logout_all(h.user_id).await.unwrap(), 2);
    assert!(h.auth.refresh_token(&a.refresh_token).await.is_err());
    assert!(h.auth.refresh_token(&b.refresh_token).await.is_err());
}

#[tokio::test]
async fn mfa_login_needs_a_second_factor() {
    let h = harness(AuthConfig::with_secret("auth-integration")).await;
    let enrollment = h.auth.begin_mfa_enrollment(h.user_id).await.unwrap();
    let code = totp::generate_code(&enrollment.secret, Utc::now().timestamp()).unwrap();
    let backup_codes = h.auth.confirm_mfa_enrollment(h.user_id, &code).await.unwrap();

    let outcome = h.auth.login(EMAIL, PASSWORD, Some("10.0.0.7")).await.unwrap();
    assert!(outcome.requires_mfa());
    assert!(outcome.tokens().is_none());
    let LoginOutcome::MfaRequired { mfa_token } = outcome else {
        panic!("expected an MFA challenge");
    };

    let code = totp::generate_code(&enrollment.secret, Utc::now().timestamp()).unwrap();
    let tokens = h.auth.complete_mfa(&mfa_token, &code).await.unwrap();
    assert!(h.auth.validate_access_token(&tokens.access_token).is_ok());

    let err = h.auth.complete_mfa(&mfa_token, &code).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidMfaChallenge));

    // A backup code works exactly once.
    let outcome = h.auth.login(EMAIL, PASSWORD, None).await.unwrap();
    let token = outcome.mfa_token().unwrap().to_string();
    h.auth.complete_mfa(&token, &backup_codes[0]).await.unwrap();
    let token = h.auth.login(EMAIL, PASSWORD, None).await.unwrap().mfa_token().unwrap().to_string();
    let err = h.auth.complete_mfa(&token, &backup_codes[0]).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidMfaCode));
}

#[tokio::test]
async fn concurrent_challenges_cannot_share_a_backup_code() {
    let h = harness_with(
        AuthConfig::with_secret("auth-integration"),
        Arc::new(SlowReads(InMemoryUserRepository::new())),
    )
    .await;
    let enrollment = h.auth.begin_mfa_enrollment(h.user_id).await.unwrap();
    let code = totp::generate_code(&enrollment.secret, Utc::now().timestamp()).unwrap();
    let backup_codes = h.auth.confirm_mfa_enrollment(h.user_id, &code).await.unwrap();

    let first = h.auth.login(EMAIL, PASSWORD, None).await.unwrap().mfa_token().unwrap().to_string();
    let second = h.auth.login(EMAIL, PASSWORD, None).await.unwrap().mfa_token().unwrap().to_string();

    let (a, b) = tokio::join!(
        h.auth.complete_mfa(&first, &backup_codes[0]),
        h.auth.complete_mfa(&second, &backup_codes[0]),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    assert!(matches!(a.err().or(b.err()), Some(AuthError::InvalidMfaCode)));

    // The other codes are untouched.
    let token = h.auth.login(EMAIL, PASSWORD, None).await.unwrap().mfa_token().unwrap().to_string();
    h.auth.complete_mfa(&token, &backup_codes[1]).await.unwrap();
}

#[tokio::test]
async fn login_attempts_are_audited() {
    let h = harness(AuthConfig::with_secret("auth-integration")).await;
    let _ = h.auth.login(EMAIL, "wrong", None).await;
    h.auth.login(EMAIL, PASSWORD, None).await.unwrap();

    let successes: Vec<bool> = h
        .audit
        .authentication_actions()
        .into_iter()
        .map(|(_, success)| success)
        .collect();
    assert!(successes.contains(&false));
    assert!(successes.contains(&true));
}

//! Login, MFA, token rotation and account maintenance.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::jwt::{TokenService, generate_opaque_token, hash_token};
use super::password::{hash_password, verify_password};
use super::store::{InMemoryMfaChallengeStore, InMemoryRefreshTokenStore, MfaChallengeStore, RefreshTokenStore};
use super::{AuthError, totp};
use crate::audit::{Auditor, Severity};
use crate::config::AuthConfig;
use crate::error::RepositoryError;
use crate::models::auth::{
    AuthUser, LoginOutcome, MfaChallenge, MfaEnrollment, RefreshTokenRecord, RegisterRequest,
    TokenClaims, TokenPair, User,
};
use crate::repository::UserRepository;

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    tokens: TokenService,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    challenges: Arc<dyn MfaChallengeStore>,
    auditor: Auditor,
    config: AuthConfig,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    /// Service with in-memory token stores.
    pub fn new(config: AuthConfig, users: Arc<dyn UserRepository>, auditor: Auditor) -> Self {
        Self::with_stores(
            config,
            users,
            Arc::new(InMemoryRefreshTokenStore::new()),
            Arc::new(InMemoryMfaChallengeStore::new()),
            auditor,
        )
    }

    pub fn with_stores(
        config: AuthConfig,
        users: Arc<dyn UserRepository>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        challenges: Arc<dyn MfaChallengeStore>,
        auditor: Auditor,
    ) -> Self {
        let tokens = TokenService::new(
            config.jwt_secret.as_bytes(),
            Duration::seconds(config.access_token_ttl_secs),
        );
        Self {
            users,
            tokens,
            refresh_tokens,
            challenges,
            auditor,
            config,
        }
    }

    pub fn token_service(&self) -> &TokenService {
        &self.tokens
    }

    // -------------------------------------------------------------------------
    // Login state machine
    // -------------------------------------------------------------------------

    pub async fn login(&self, email: &str, password: &str, ip: Option<&str>) -> Result<LoginOutcome, AuthError> {
        let Some(mut user) = self.users.get_by_email(email.trim()).await? else {
            self.auditor.authentication(None, "login", false, ip).await;
            return Err(AuthError::InvalidCredentials);
        };
        let now = Utc::now();

        if let Some(until) = user.locked_until {
            if until > now {
                self.auditor.authentication(Some(user.id), "login_locked", false, ip).await;
                return Err(AuthError::Locked {
                    remaining_minutes: remaining_minutes(until, now),
                });
            }
            // Lock window elapsed: start a fresh count.
            self.users.unlock_user(user.id).await?;
            user.locked_until = None;
            user.failed_login_attempts = 0;
        }

        if !user.is_active {
            self.auditor.authentication(Some(user.id), "login", false, ip).await;
            return Err(AuthError::Inactive);
        }

        if !verify_password(password, &user.password_hash)? {
            self.record_failed_login(&user, ip).await?;
            return Err(AuthError::InvalidCredentials);
        }

        if user.failed_login_attempts > 0 {
            self.users.reset_failed_login_attempts(user.id).await?;
        }

        if user.mfa_enabled {
            let mfa_token = generate_opaque_token();
            self.challenges
                .insert(
                    hash_token(&mfa_token),
                    MfaChallenge {
                        user_id: user.id,
                        expires_at: now + Duration::seconds(self.config.mfa_challenge_ttl_secs),
                    },
                )
                .await?;
            debug!(user_id = %user.id, "password accepted, MFA challenge issued");
            self.auditor.authentication(Some(user.id), "login_mfa_required", true, ip).await;
            return Ok(LoginOutcome::MfaRequired { mfa_token });
        }

        let pair = self.issue_tokens(&user).await?;
        self.users.update_last_login(user.id, now).await?;
        self.auditor.authentication(Some(user.id), "login", true, ip).await;
        info!(user_id = %user.id, "user logged in");
        Ok(LoginOutcome::Authenticated(pair))
    }

    async fn record_failed_login(&self, user: &User, ip: Option<&str>) -> Result<(), AuthError> {
        let attempts = self.users.increment_failed_login_attempts(user.id).await?;
        self.auditor.authentication(Some(user.id), "login", false, ip).await;
        if attempts >= self.config.max_failed_logins {
            let until = Utc::now() + Duration::minutes(self.config.lockout_minutes);
            self.users.lock_user(user.id, until).await?;
            warn!(user_id = %user.id, attempts, "account locked after failed logins");
            self.auditor
                .security_event(
                    Some(user.id),
                    "account_locked",
                    Severity::High,
                    &format!("locked for {} minutes", self.config.lockout_minutes),
                )
                .await;
        }
        Ok(())
    }

    /// Redeem an MFA challenge with a TOTP code or an unused backup code.
    /// The challenge is consumed whatever the outcome.
    pub async fn complete_mfa(&self, mfa_token: &str, code: &str) -> Result<TokenPair, AuthError> {
        let Some(challenge) = self.challenges.take(&hash_token(mfa_token)).await? else {
            self.auditor.authentication(None, "mfa", false, None).await;
            return Err(AuthError::InvalidMfaChallenge);
        };
        let user = self
            .users
            .get_by_id(challenge.user_id)
            .await?
            .ok_or(AuthError::InvalidMfaChallenge)?;
        if !user.is_active {
            return Err(AuthError::Inactive);
        }
        let secret = match (&user.mfa_secret, user.mfa_enabled) {
            (Some(secret), true) => secret.clone(),
            _ => return Err(AuthError::MfaNotEnrolled),
        };

        let now = Utc::now();
        let mut valid = totp::verify_code(&secret, code, now.timestamp(), self.config.mfa_window)?;
        if !valid && self.consume_backup_code(user.id, code).await? {
            valid = true;
        }
        if !valid {
            self.auditor.authentication(Some(user.id), "mfa", false, None).await;
            return Err(AuthError::InvalidMfaCode);
        }

        let pair = self.issue_tokens(&user).await?;
        self.users.update_last_login(user.id, now).await?;
        self.auditor.authentication(Some(user.id), "mfa", true, None).await;
        info!(user_id = %user.id, "MFA completed");
        Ok(pair)
    }

    async fn consume_backup_code(&self, user_id: Uuid, code: &str) -> Result<bool, AuthError> {
        let hash = totp::hash_backup_code(code);
        let Some(remaining) = self.users.consume_backup_code(user_id, &hash).await? else {
            return Ok(false);
        };
        self.auditor
            .security_event(
                Some(user_id),
                "backup_code_used",
                Severity::Medium,
                &format!("{remaining} backup codes remaining"),
            )
            .await;
        Ok(true)
    }

    async fn issue_tokens(&self, user: &User) -> Result<TokenPair, AuthError> {
        let roles = self.users.get_roles(user.id).await?;
        let access_token = self.tokens.generate_access_token(user, &roles)?;
        let refresh_token = generate_opaque_token();
        let now = Utc::now();
        self.refresh_tokens
            .insert(
                hash_token(&refresh_token),
                RefreshTokenRecord {
                    user_id: user.id,
                    created_at: now,
                    expires_at: now + Duration::days(self.config.refresh_token_ttl_days),
                    revoked: false,
                    revoked_at: None,
                },
            )
            .await?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".into(),
            expires_in: self.tokens.access_ttl().num_seconds(),
            user: auth_user(user, roles),
        })
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    /// Rotate a refresh token. The presented token is revoked atomically, so
    /// a second redemption always fails.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let Some(record) = self.refresh_tokens.redeem(&hash_token(refresh_token)).await? else {
            self.auditor.authentication(None, "refresh", false, None).await;
            return Err(AuthError::InvalidRefreshToken);
        };
        let user = self
            .users
            .get_by_id(record.user_id)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;
        if !user.is_active {
            return Err(AuthError::Inactive);
        }
        let pair = self.issue_tokens(&user).await?;
        self.auditor.authentication(Some(user.id), "refresh", true, None).await;
        Ok(pair)
    }

    /// Revoke `refresh_token`. The access token is only used to attribute
    /// the audit event; an invalid one does not stop the revocation.
    pub async fn logout(&self, access_token: Option<&str>, refresh_token: &str) -> Result<(), AuthError> {
        let user_id = access_token
            .and_then(|t| self.tokens.verify_access_token(t).ok())
            .and_then(|claims| claims.user_id());
        let revoked = self.refresh_tokens.revoke(&hash_token(refresh_token)).await?;
        self.auditor.authentication(user_id, "logout", true, None).await;
        debug!(user_id = ?user_id, revoked, "logout");
        Ok(())
    }

    /// Revoke every refresh token of a user.
    pub async fn logout_all(&self, user_id: Uuid) -> Result<usize, AuthError> {
        let count = self.refresh_tokens.revoke_all_for_user(user_id).await?;
        self.auditor.authentication(Some(user_id), "logout_all", true, None).await;
        info!(%user_id, count, "revoked all sessions");
        Ok(count)
    }

    pub fn validate_access_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.tokens.verify_access_token(token)
    }

    /// Drop expired challenges and refresh tokens.
    pub async fn purge_expired(&self) -> Result<usize, AuthError> {
        let challenges = self.challenges.purge_expired().await?;
        let tokens = self.refresh_tokens.purge_expired().await?;
        Ok(challenges + tokens)
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    pub async fn register(&self, request: RegisterRequest) -> Result<AuthUser, AuthError> {
        let email = request.email.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::Validation("a valid email is required".into()));
        }
        self.config.password_policy.check(&request.password)?;
        if self.users.get_by_email(&email).await?.is_some() {
            return Err(AuthError::DuplicateEmail);
        }

        let now = Utc::now();
        let user = User {
            id: crate::models::new_id(),
            organization_id: request.organization_id,
            email,
            name: request.name,
            password_hash: hash_password(&request.password)?,
            is_active: true,
            mfa_enabled: false,
            mfa_secret: None,
            backup_code_hashes: Vec::new(),
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        let user = self.users.create(user).await.map_err(|e| match e {
            RepositoryError::Conflict(_) => AuthError::DuplicateEmail,
            other => AuthError::Repository(other),
        })?;
        self.auditor.authentication(Some(user.id), "register", true, None).await;
        info!(user_id = %user.id, "user registered");
        Ok(auth_user(&user, Vec::new()))
    }

    /// Change the password and revoke existing refresh tokens.
    pub async fn change_password(&self, user_id: Uuid, current: &str, new_password: &str) -> Result<(), AuthError> {
        let mut user = self.load_user(user_id).await?;
        if !verify_password(current, &user.password_hash)? {
            self.auditor.authentication(Some(user_id), "change_password", false, None).await;
            return Err(AuthError::InvalidCredentials);
        }
        self.config.password_policy.check(new_password)?;
        user.password_hash = hash_password(new_password)?;
        self.users.update(&user).await?;
        self.refresh_tokens.revoke_all_for_user(user_id).await?;
        self.auditor.authentication(Some(user_id), "change_password", true, None).await;
        Ok(())
    }

    /// Generate a TOTP secret and park it on the user; MFA stays disabled
    /// until [`confirm_mfa_enrollment`](Self::confirm_mfa_enrollment).
    pub async fn begin_mfa_enrollment(&self, user_id: Uuid) -> Result<MfaEnrollment, AuthError> {
        let mut user = self.load_user(user_id).await?;
        if user.mfa_enabled {
            return Err(AuthError::Validation("MFA is already enabled".into()));
        }
        let secret = totp::generate_secret();
        let otpauth_uri = totp::otpauth_uri(&secret, &user.email, &self.config.mfa_issuer)?;
        user.mfa_secret = Some(secret.clone());
        self.users.update(&user).await?;
        Ok(MfaEnrollment { secret, otpauth_uri })
    }

    /// Enable MFA after a valid code. Returns the one-time backup codes;
    /// only their hashes are kept.
    pub async fn confirm_mfa_enrollment(&self, user_id: Uuid, code: &str) -> Result<Vec<String>, AuthError> {
        let mut user = self.load_user(user_id).await?;
        if user.mfa_enabled {
            return Err(AuthError::Validation("MFA is already enabled".into()));
        }
        let secret = user.mfa_secret.clone().ok_or(AuthError::MfaNotEnrolled)?;
        if !totp::verify_code(&secret, code, Utc::now().timestamp(), self.config.mfa_window)? {
            return Err(AuthError::InvalidMfaCode);
        }
        let codes = totp::generate_backup_codes();
        user.backup_code_hashes = codes.iter().map(|c| totp::hash_backup_code(c)).collect();
        user.mfa_enabled = true;
        self.users.update(&user).await?;
        self.auditor
            .security_event(Some(user_id), "mfa_enabled", Severity::Low, "TOTP enrolled")
            .await;
        Ok(codes)
    }

    pub async fn disable_mfa(&self, user_id: Uuid, password: &str) -> Result<(), AuthError> {
        let mut user = self.load_user(user_id).await?;
        if !verify_password(password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        user.mfa_enabled = false;
        user.mfa_secret = None;
        user.backup_code_hashes.clear();
        self.users.update(&user).await?;
        self.auditor
            .security_event(Some(user_id), "mfa_disabled", Severity::Medium, "TOTP removed")
            .await;
        Ok(())
    }

    /// Administrative unlock; also clears the failed-attempt counter.
    pub async fn unlock_user(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.load_user(user_id).await?;
        self.users.unlock_user(user_id).await?;
        self.auditor
            .security_event(Some(user_id), "account_unlocked", Severity::Low, "manual unlock")
            .await;
        Ok(())
    }

    async fn load_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.users.get_by_id(user_id).await?.ok_or(AuthError::UserNotFound)
    }
}

fn auth_user(user: &User, roles: Vec<String>) -> AuthUser {
    AuthUser {
        id: user.id,
        organization_id: user.organization_id,
        email: user.email.clone(),
        name: user.name.clone(),
        roles,
    }
}

/// Whole minutes left, rounded up, at least one.
fn remaining_minutes(until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let secs = (until - now).num_seconds().max(0);
    ((secs + 59) / 60).max(1)
}

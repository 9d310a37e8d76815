//! Authentication domain models.
//!
//! `User` is owned by the external user repository; the core only mutates
//! its lockout, MFA and last-login fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User account as seen by the authentication core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub mfa_enabled: bool,
    /// Base32 TOTP secret. Present while enrollment is pending or enabled.
    #[serde(skip_serializing)]
    pub mfa_secret: Option<String>,
    /// SHA-256 hashes of unused backup codes.
    #[serde(skip_serializing, default)]
    pub backup_code_hashes: Vec<String>,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether a lockout is currently in force.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

/// Registration input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub organization_id: Uuid,
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

/// Public projection of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub roles: Vec<String>,
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Organization ID.
    pub org: String,
    pub email: String,
    pub roles: Vec<String>,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Unique token id.
    pub jti: String,
}

impl TokenClaims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    pub fn organization_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.org).ok()
    }
}

/// Access + refresh token pair returned on successful authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user: AuthUser,
}

/// Result of a password login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum LoginOutcome {
    Authenticated(TokenPair),
    MfaRequired { mfa_token: String },
}

impl LoginOutcome {
    pub fn requires_mfa(&self) -> bool {
        matches!(self, Self::MfaRequired { .. })
    }

    pub fn tokens(&self) -> Option<&TokenPair> {
        match self {
            Self::Authenticated(pair) => Some(pair),
            Self::MfaRequired { .. } => None,
        }
    }

    pub fn mfa_token(&self) -> Option<&str> {
        match self {
            Self::MfaRequired { mfa_token } => Some(mfa_token),
            Self::Authenticated(_) => None,
        }
    }
}

/// Pending MFA challenge (single use, time-boxed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaChallenge {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Refresh token record, keyed by token hash in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

/// Material handed to the user when MFA enrollment starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaEnrollment {
    pub secret: String,
    pub otpauth_uri: String,
}

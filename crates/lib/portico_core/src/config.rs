//! Broker configuration.

use std::env;
use std::path::PathBuf;

use crate::auth::jwt::resolve_jwt_secret;
use crate::models::vault::ProviderType;

/// Password requirements. Every class check can be switched off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
        }
    }
}

impl PasswordPolicy {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            min_length: parse_or(lookup, "PORTICO_PASSWORD_MIN_LENGTH", d.min_length),
            require_uppercase: flag_or(lookup, "PORTICO_PASSWORD_REQUIRE_UPPERCASE", d.require_uppercase),
            require_lowercase: flag_or(lookup, "PORTICO_PASSWORD_REQUIRE_LOWERCASE", d.require_lowercase),
            require_digit: flag_or(lookup, "PORTICO_PASSWORD_REQUIRE_DIGIT", d.require_digit),
            require_special: flag_or(lookup, "PORTICO_PASSWORD_REQUIRE_SPECIAL", d.require_special),
        }
    }
}

/// Authentication and session settings.
#[derive(Clone)]
pub struct AuthConfig {
    /// HS256 signing secret.
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_days: i64,
    pub mfa_challenge_ttl_secs: i64,
    pub max_failed_logins: u32,
    pub lockout_minutes: i64,
    /// Accepted TOTP steps either side of the current one.
    pub mfa_window: u32,
    /// Issuer shown by authenticator apps.
    pub mfa_issuer: String,
    pub password_policy: PasswordPolicy,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_days", &self.refresh_token_ttl_days)
            .field("max_failed_logins", &self.max_failed_logins)
            .field("lockout_minutes", &self.lockout_minutes)
            .field("mfa_window", &self.mfa_window)
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    /// Defaults with an explicit signing secret.
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            access_token_ttl_secs: 15 * 60,
            refresh_token_ttl_days: 30,
            mfa_challenge_ttl_secs: 5 * 60,
            max_failed_logins: 5,
            lockout_minutes: 15,
            mfa_window: 1,
            mfa_issuer: "Portico".into(),
            password_policy: PasswordPolicy::default(),
        }
    }

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let jwt_secret = lookup("PORTICO_JWT_SECRET")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(resolve_jwt_secret);
        let d = Self::with_secret(jwt_secret);
        Self {
            max_failed_logins: parse_or(lookup, "PORTICO_MAX_FAILED_LOGINS", d.max_failed_logins),
            lockout_minutes: parse_or(lookup, "PORTICO_LOCKOUT_MINUTES", d.lockout_minutes),
            mfa_window: parse_or(lookup, "PORTICO_MFA_WINDOW", d.mfa_window),
            refresh_token_ttl_days: parse_or(lookup, "PORTICO_REFRESH_TOKEN_DAYS", d.refresh_token_ttl_days),
            password_policy: PasswordPolicy::from_lookup(lookup),
            ..d
        }
    }
}

/// Credential vault settings.
#[derive(Clone)]
pub struct VaultConfig {
    pub provider: ProviderType,
    pub storage_dir: PathBuf,
    /// Base64 256-bit master key for the local store.
    pub master_key: Option<String>,
    pub cache_ttl_secs: i64,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("provider", &self.provider)
            .field("storage_dir", &self.storage_dir)
            .field("master_key", &self.master_key.as_ref().map(|_| "***"))
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .finish()
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::Local,
            storage_dir: default_vault_dir(),
            master_key: None,
            cache_ttl_secs: 300,
        }
    }
}

impl VaultConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            provider: lookup("PORTICO_VAULT_PROVIDER")
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.provider),
            storage_dir: lookup("PORTICO_VAULT_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(d.storage_dir),
            master_key: lookup("PORTICO_MASTER_KEY").filter(|v| !v.is_empty()),
            cache_ttl_secs: parse_or(lookup, "PORTICO_VAULT_CACHE_TTL_SECS", d.cache_ttl_secs),
        }
    }
}

/// `<data_dir>/portico/vault`.
pub fn default_vault_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("portico")
        .join("vault")
}

/// MCP gateway settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Per-minute limit when a server sets none.
    pub default_rate_limit: u32,
    pub rate_limit_window_secs: u64,
    pub default_timeout_secs: u64,
    /// Age after which cached capabilities are refreshed.
    pub capability_ttl_secs: i64,
    pub health_check_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_rate_limit: 60,
            rate_limit_window_secs: 60,
            default_timeout_secs: 30,
            capability_ttl_secs: 3600,
            health_check_interval_secs: 300,
        }
    }
}

impl GatewayConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            default_rate_limit: parse_or(lookup, "PORTICO_DEFAULT_RATE_LIMIT", d.default_rate_limit),
            default_timeout_secs: parse_or(lookup, "PORTICO_MCP_TIMEOUT_SECS", d.default_timeout_secs),
            health_check_interval_secs: parse_or(
                lookup,
                "PORTICO_HEALTH_CHECK_INTERVAL_SECS",
                d.health_check_interval_secs,
            ),
            ..d
        }
    }
}

/// Complete broker configuration.
#[derive(Debug, Clone)]
pub struct PorticoConfig {
    pub auth: AuthConfig,
    pub vault: VaultConfig,
    pub gateway: GatewayConfig,
}

impl PorticoConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                          | Default                         |
    /// |-----------------------------------|---------------------------------|
    /// | `PORTICO_JWT_SECRET` / `JWT_SECRET` | generated & persisted to file |
    /// | `PORTICO_MASTER_KEY`              | none (local vault needs it)     |
    /// | `PORTICO_VAULT_DIR`               | `<data_dir>/portico/vault`      |
    /// | `PORTICO_VAULT_PROVIDER`          | `local`                         |
    /// | `PORTICO_VAULT_CACHE_TTL_SECS`    | `300`                           |
    /// | `PORTICO_MAX_FAILED_LOGINS`       | `5`                             |
    /// | `PORTICO_LOCKOUT_MINUTES`         | `15`                            |
    /// | `PORTICO_MFA_WINDOW`              | `1`                             |
    /// | `PORTICO_DEFAULT_RATE_LIMIT`      | `60`                            |
    /// | `PORTICO_MCP_TIMEOUT_SECS`        | `30`                            |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            auth: AuthConfig::from_lookup(&lookup),
            vault: VaultConfig::from_lookup(&lookup),
            gateway: GatewayConfig::from_lookup(&lookup),
        }
    }
}

fn parse_or<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key).as_deref().map(str::trim) {
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some("0") | Some("false") | Some("no") | Some("off") => false,
        _ => default,
    }
}

//! Token minting and verification.
//!
//! Access tokens are HS256 JWTs. Refresh and MFA challenge tokens are opaque
//! random strings; only their SHA-256 hashes are stored.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::AuthError;
use crate::models::auth::{TokenClaims, User};
use crate::models::new_id;

/// Opaque token length (alphanumeric characters).
const OPAQUE_TOKEN_LEN: usize = 64;

/// Signs and verifies access tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &[u8], access_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Generate a signed access token for `user`.
    pub fn generate_access_token(&self, user: &User, roles: &[String]) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: user.id.to_string(),
            org: user.organization_id.to_string(),
            email: user.email.clone(),
            roles: roles.to_vec(),
            exp: (now + self.access_ttl).timestamp(),
            iat: now.timestamp(),
            jti: new_id().to_string(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::Token(format!("jwt encode: {e}")))
    }

    /// Verify signature and expiry, returning the claims.
    pub fn verify_access_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.leeway = 0;
        decode::<TokenClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::Token(format!("jwt verify: {e}")))
    }
}

/// Random 64-character alphanumeric token.
pub fn generate_opaque_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(OPAQUE_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// SHA-256 hash a token for storage.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Resolve the JWT secret: `PORTICO_JWT_SECRET` → `JWT_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    for var in ["PORTICO_JWT_SECRET", "JWT_SECRET"] {
        if let Ok(secret) = std::env::var(var)
            && !secret.is_empty()
        {
            return secret;
        }
    }
    let secret_path = jwt_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret = generate_opaque_token();
    match persist_secret(&secret_path, &secret) {
        Ok(()) => info!(path = %secret_path.display(), "generated new JWT secret"),
        Err(e) => warn!(
            path = %secret_path.display(),
            "generated JWT secret could not be saved, sessions will not survive a restart: {e}"
        ),
    }
    secret
}

fn persist_secret(path: &Path, secret: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, secret)
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("portico")
        .join("jwt-secret")
}

//! Ephemeral session token stores.
//!
//! Both stores are keyed by token hash and expose the atomic operations the
//! session lifecycle relies on: check-and-remove for MFA challenges and
//! check-and-mark for refresh tokens. The `DashMap` implementations suit a
//! single instance; a shared TTL store can implement the same traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::auth::{MfaChallenge, RefreshTokenRecord};

/// Sweep interval for the background cleanup tasks.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[async_trait]
pub trait MfaChallengeStore: Send + Sync {
    async fn insert(&self, token_hash: String, challenge: MfaChallenge) -> Result<(), RepositoryError>;

    /// Remove and return the challenge. Expired challenges are removed too
    /// but yield `None`.
    async fn take(&self, token_hash: &str) -> Result<Option<MfaChallenge>, RepositoryError>;

    async fn purge_expired(&self) -> Result<usize, RepositoryError>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, token_hash: String, record: RefreshTokenRecord) -> Result<(), RepositoryError>;

    /// If the token is valid, mark it revoked and return the record as it
    /// was. Unknown, revoked or expired tokens yield `None`.
    async fn redeem(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, RepositoryError>;

    /// Mark revoked. Returns whether a live token was revoked.
    async fn revoke(&self, token_hash: &str) -> Result<bool, RepositoryError>;

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, RepositoryError>;

    async fn purge_expired(&self) -> Result<usize, RepositoryError>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// Count of entries removed by one cleanup pass; failures are logged and
/// count as zero.
fn log_purge(store: &str, result: Result<usize, RepositoryError>) -> usize {
    match result {
        Ok(purged) => purged,
        Err(e) => {
            warn!(store, "purging expired entries failed: {e}");
            0
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMfaChallengeStore {
    challenges: DashMap<String, MfaChallenge>,
}

impl InMemoryMfaChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                log_purge("mfa_challenges", store.purge_expired().await);
            }
        })
    }
}

#[async_trait]
impl MfaChallengeStore for InMemoryMfaChallengeStore {
    async fn insert(&self, token_hash: String, challenge: MfaChallenge) -> Result<(), RepositoryError> {
        self.challenges.insert(token_hash, challenge);
        Ok(())
    }

    async fn take(&self, token_hash: &str) -> Result<Option<MfaChallenge>, RepositoryError> {
        let Some((_, challenge)) = self.challenges.remove(token_hash) else {
            return Ok(None);
        };
        if challenge.expires_at <= Utc::now() {
            return Ok(None);
        }
        Ok(Some(challenge))
    }

    async fn purge_expired(&self) -> Result<usize, RepositoryError> {
        let now = Utc::now();
        let before = self.challenges.len();
        self.challenges.retain(|_, c| c.expires_at > now);
        let purged = before.saturating_sub(self.challenges.len());
        if purged > 0 {
            debug!(purged, "purged expired MFA challenges");
        }
        Ok(purged)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenStore {
    tokens: DashMap<String, RefreshTokenRecord>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                log_purge("refresh_tokens", store.purge_expired().await);
            }
        })
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn insert(&self, token_hash: String, record: RefreshTokenRecord) -> Result<(), RepositoryError> {
        self.tokens.insert(token_hash, record);
        Ok(())
    }

    async fn redeem(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, RepositoryError> {
        let now = Utc::now();
        // `get_mut` holds the shard lock, so check and mark happen together.
        let Some(mut record) = self.tokens.get_mut(token_hash) else {
            return Ok(None);
        };
        if !record.is_valid(now) {
            return Ok(None);
        }
        let snapshot = record.clone();
        record.revoked = true;
        record.revoked_at = Some(now);
        Ok(Some(snapshot))
    }

    async fn revoke(&self, token_hash: &str) -> Result<bool, RepositoryError> {
        let now = Utc::now();
        match self.tokens.get_mut(token_hash) {
            Some(mut record) if !record.revoked => {
                record.revoked = true;
                record.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, RepositoryError> {
        let now = Utc::now();
        let mut count = 0;
        for mut entry in self.tokens.iter_mut() {
            let record = entry.value_mut();
            if record.user_id == user_id && !record.revoked {
                record.revoked = true;
                record.revoked_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_expired(&self) -> Result<usize, RepositoryError> {
        let now = Utc::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, r| r.expires_at > now);
        let purged = before.saturating_sub(self.tokens.len());
        if purged > 0 {
            debug!(purged, "purged expired refresh tokens");
        }
        Ok(purged)
    }
}

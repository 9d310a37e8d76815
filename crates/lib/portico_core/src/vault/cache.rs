//! In-memory secret cache with TTL-based expiration.
//!
//! Entries carry an absolute expiry checked on read; nothing is evicted
//! proactively. A generation counter, bumped by every invalidation, lets a
//! reader that fetched from the provider before a concurrent write discard
//! its now-stale value instead of caching it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::models::vault::Secret;

/// Default TTL for cached secrets: 5 minutes.
pub const DEFAULT_TTL_SECS: i64 = 300;

#[derive(Debug, Clone)]
struct CacheEntry {
    secret: Secret,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SecretCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    generation: u64,
}

impl SecretCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            generation: 0,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current generation, read before a provider fetch.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cached secret if present, inside its TTL and still usable.
    pub fn get(&self, name: &str, now: DateTime<Utc>) -> Option<Secret> {
        self.entries.get(name).and_then(|entry| {
            if now < entry.expires_at && entry.secret.is_usable(now) {
                Some(entry.secret.clone())
            } else {
                None
            }
        })
    }

    /// Insert unless an invalidation happened since `generation` was read.
    /// Returns whether the value was cached.
    pub fn insert_if_current(&mut self, secret: Secret, generation: u64, now: DateTime<Utc>) -> bool {
        if generation != self.generation {
            return false;
        }
        let expires_at = now + self.ttl;
        self.entries
            .insert(secret.name.clone(), CacheEntry { secret, expires_at });
        true
    }

    pub fn invalidate(&mut self, name: &str) {
        self.generation += 1;
        self.entries.remove(name);
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SecretCache {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TTL_SECS))
    }
}

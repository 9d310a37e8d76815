//! Fixed-window request limiter keyed by (server, user).

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Counts calls per key and rejects once a window's count exceeds the limit.
///
/// The window restarts when the full period has elapsed since its first
/// call, so bursts of up to twice the limit are possible across a boundary.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<(Uuid, Uuid), Window>,
    period: Duration,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            period,
        }
    }

    /// Record one call. `Err` carries whole seconds until the window resets.
    pub fn check(&self, server_id: Uuid, user_id: Uuid, limit: u32) -> Result<(), u64> {
        let now = Instant::now();
        // The entry guard holds the shard lock across reset and increment.
        let mut window = self.windows.entry((server_id, user_id)).or_insert(Window {
            started: now,
            count: 0,
        });
        let elapsed = now.duration_since(window.started);
        if elapsed >= self.period {
            window.started = now;
            window.count = 0;
        }
        window.count += 1;
        if window.count > limit {
            let remaining = self.period.saturating_sub(now.duration_since(window.started));
            return Err(remaining.as_secs_f64().ceil().max(1.0) as u64);
        }
        Ok(())
    }

    /// Drop windows that have fully elapsed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.started) < self.period);
        before.saturating_sub(self.windows.len())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn third_call_in_window_is_rejected() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let (server, user) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(limiter.check(server, user, 2).is_ok());
        assert!(limiter.check(server, user, 2).is_ok());
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(limiter.check(server, user, 2), Err(40));

        tokio::time::advance(Duration::from_secs(41)).await;
        assert!(limiter.check(server, user, 2).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let server = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(limiter.check(server, a, 1).is_ok());
        assert!(limiter.check(server, a, 1).is_err());
        assert!(limiter.check(server, b, 1).is_ok());
        assert!(limiter.check(Uuid::new_v4(), a, 1).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_never_exceed_the_limit() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60)));
        let (server, user) = (Uuid::new_v4(), Uuid::new_v4());
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let l = Arc::clone(&limiter);
                tokio::spawn(async move { l.check(server, user, 10).is_ok() })
            })
            .collect();
        let mut passed = 0;
        for h in handles {
            if h.await.unwrap() {
                passed += 1;
            }
        }
        assert_eq!(passed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_elapsed_windows() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        limiter.check(Uuid::new_v4(), Uuid::new_v4(), 5).unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.purge_expired(), 1);
        assert!(limiter.is_empty());
    }
}

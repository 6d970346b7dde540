//! # Sliding-Window Rate Limiter
//!
//! A true sliding-window limiter: each identifier owns a sorted set of
//! per-request markers scored by request time, and every check first drops
//! markers older than the trailing window before counting. The four steps
//! (trim, count, add, refresh TTL) run as one atomic batch so concurrent
//! checks for the same identifier cannot race past the limit.
//!
//! On any store failure the limiter fails OPEN: the request is allowed with
//! a full-quota response. Rate limiting is protective, not
//! correctness-critical, and a store outage must not become a total outage.

use crate::store::KvStore;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests in the window, counting this one
    pub count: u32,
    /// Requests left in the window after this one
    pub remaining: u32,
    /// When a fresh window would be available
    pub reset_time: SystemTime,
}

impl RateLimitDecision {
    /// Build a decision from the marker count observed before this request's
    /// marker was added.
    ///
    /// The decision is based on the pre-add count, so the request that lands
    /// exactly at the limit is still allowed: a limiter configured for N
    /// requests per window admits exactly N.
    fn from_count_before(count_before: u32, max_requests: u32, reset_time: SystemTime) -> Self {
        Self {
            allowed: count_before < max_requests,
            count: count_before + 1,
            remaining: max_requests.saturating_sub(count_before + 1),
            reset_time,
        }
    }

    fn fail_open(max_requests: u32, reset_time: SystemTime) -> Self {
        Self {
            allowed: true,
            count: 0,
            remaining: max_requests,
            reset_time,
        }
    }
}

/// Sliding-window request limiter over the shared store.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: KvStore,
    window: Duration,
    max_requests: u32,
    key_prefix: String,
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window` for each
    /// identifier, keyed under `key_prefix`.
    pub fn new(
        store: KvStore,
        window: Duration,
        max_requests: u32,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            window,
            max_requests,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.key_prefix, identifier)
    }

    /// Check whether a request from `identifier` is allowed, recording it in
    /// the window either way.
    ///
    /// Atomically: markers older than `now - window` are removed, the
    /// survivors are counted, a uniquely-identified marker for this request
    /// is added at `now`, and the key's TTL is refreshed to the window
    /// length. The allow decision comes from the count observed before the
    /// new marker was added.
    pub async fn is_allowed(&self, identifier: &str) -> RateLimitDecision {
        let key = self.key(identifier);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let cutoff = now - self.window.as_secs_f64();
        let reset_time = SystemTime::now() + self.window;

        // Marker members must be unique so simultaneous requests in the
        // same instant each count.
        let member = format!("{}-{}", (now * 1000.0) as u64, Uuid::new_v4());

        match self
            .store
            .sliding_window_probe(&key, cutoff, now, &member, self.window)
            .await
        {
            Ok(count_before) => {
                let decision = RateLimitDecision::from_count_before(
                    count_before.min(u32::MAX as u64) as u32,
                    self.max_requests,
                    reset_time,
                );
                debug!(
                    identifier,
                    allowed = decision.allowed,
                    count = decision.count,
                    "Rate limit check"
                );
                decision
            }
            Err(e) => {
                warn!(identifier, error = %e, "Rate limit check failed, failing open");
                RateLimitDecision::fail_open(self.max_requests, reset_time)
            }
        }
    }

    /// Clear an identifier's window, returning whether one existed.
    pub async fn reset(&self, identifier: &str) -> bool {
        let key = self.key(identifier);
        match self.store.delete(&key).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(identifier, error = %e, "Rate limit reset failed");
                false
            }
        }
    }

    /// The configured window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The configured per-window request ceiling.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(count_before: u32, max: u32) -> RateLimitDecision {
        RateLimitDecision::from_count_before(count_before, max, SystemTime::now())
    }

    #[test]
    fn test_remaining_counts_down() {
        assert_eq!(at(0, 3).remaining, 2);
        assert_eq!(at(1, 3).remaining, 1);
        assert_eq!(at(2, 3).remaining, 0);
    }

    #[test]
    fn test_boundary_request_is_allowed() {
        // The Nth request (N == max) sees a pre-add count of N-1 and is
        // still admitted, landing exactly at the limit.
        let decision = at(2, 3);
        assert!(decision.allowed);
        assert_eq!(decision.count, 3);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_over_limit_is_denied() {
        let decision = at(3, 3);
        assert!(!decision.allowed);
        assert_eq!(decision.count, 4);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_fail_open_reports_full_quota() {
        let decision = RateLimitDecision::fail_open(5, SystemTime::now());
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 5);
    }
}

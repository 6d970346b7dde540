//! # BrandHub Cache Core
//!
//! Redis-backed caching, session, and rate-limiting core for the BrandHub
//! digital-asset-management portal. This crate is an internal library consumed
//! by request-handling code; it has no wire protocol of its own.
//!
//! ## Features
//! - Namespaced JSON cache with per-call TTL and a read-through helper
//! - TTL-backed session records with partial update, touch, and per-user sweeps
//! - Sliding-window rate limiting backed by per-identifier sorted sets
//! - Coordinated multi-key invalidation for portal entities
//! - Day-bucketed analytics event recording and counter aggregation
//!
//! ## Architecture
//! All components share one [`KvStore`], an explicitly constructed client over
//! a single managed Redis connection. The store adapter owns retries and
//! command timeouts; the components above it own the degrade-on-failure
//! policy:
//!
//! 1. **KvStore**: connection management, bounded retry, atomic pipelines
//! 2. **CacheManager**: fail-soft namespaced cache (errors become misses)
//! 3. **SessionManager**: session lifecycle, merge-updates, scan-based sweeps
//! 4. **RateLimiter**: fail-open sliding-window limiter
//! 5. **CacheInvalidator**: concurrent best-effort entity fan-out
//! 6. **AnalyticsCollector**: fail-soft event lists and dimension counters
//!
//! Shutdown is drop-based: the managed connection closes when the last
//! [`KvStore`] clone is dropped, and [`KvStore::close`] exists to make that
//! release explicit at application shutdown.
//!
//! ## Usage Example
//! ```rust,no_run
//! use brandhub_cache::{CacheManager, KvStore, StoreConfig};
//!
//! # async fn example() -> Result<(), brandhub_cache::StoreError> {
//! let store = KvStore::connect(StoreConfig::default()).await?;
//! let orgs = CacheManager::new(store.clone(), "org");
//!
//! orgs.set("details:42", &serde_json::json!({"name": "Acme"}), None).await;
//! let details = orgs.get::<serde_json::Value>("details:42").await;
//! assert!(details.is_some());
//! # Ok(())
//! # }
//! ```

/// Store connection configuration: URL, logical database, timeouts, retry.
pub mod config;

/// Error types shared across the store adapter and components.
pub mod error;

/// The KV store adapter over a managed Redis connection.
pub mod store;

/// Namespaced, fail-soft JSON cache and the read-through helper.
pub mod cache;

/// Session records, lifecycle operations, and scan-based sweeps.
pub mod session;

/// Sliding-window rate limiting.
pub mod rate_limit;

/// Entity-level cache invalidation fan-out.
pub mod invalidation;

/// Day-bucketed analytics events and counters.
pub mod analytics;

pub use analytics::{AnalyticsCollector, AnalyticsEvent, KNOWN_EVENT_TYPES};
pub use cache::{get_or_set, CacheManager, DEFAULT_CACHE_TTL};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use invalidation::CacheInvalidator;
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use session::{NewSession, SessionManager, SessionRecord, SessionUpdate, DEFAULT_SESSION_TTL};
pub use store::KvStore;

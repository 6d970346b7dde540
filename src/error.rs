//! # Error Types
//!
//! Errors produced at the store-adapter boundary. The components built on top
//! of the adapter map these to their documented fallback behavior (fail-soft
//! for caching and analytics, fail-open for rate limiting) rather than
//! propagating them; request handlers never see a hard failure from this
//! crate's degrade paths.

use thiserror::Error;

/// Result type used throughout the store adapter.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the KV store adapter.
///
/// `Decode` is deliberately distinct from `Redis`: a payload that no longer
/// matches the expected shape is a data problem, not a connectivity problem,
/// and callers handle the two differently (e.g. `SessionManager` deletes
/// corrupt records preemptively).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying Redis client error (connection, protocol, command)
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failed to serialize a value before writing it
    #[error("Failed to encode value for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Stored payload could not be deserialized into the expected type
    #[error("Failed to decode value for key {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A command exceeded the configured command timeout
    #[error("Store operation timed out: {op}")]
    Timeout { op: &'static str },

    /// Invalid store configuration
    #[error("Store configuration error: {message}")]
    Configuration { message: String },
}

impl StoreError {
    /// Whether this error indicates corrupt stored data rather than a store
    /// availability problem.
    pub fn is_decode(&self) -> bool {
        matches!(self, StoreError::Decode { .. })
    }
}

//! # Session Manager
//!
//! TTL-backed session records keyed by opaque session identifiers. Sessions
//! live under the `session:` namespace of the shared store and expire
//! naturally; the manager adds partial-merge updates, activity refresh, and
//! per-user enumeration and deletion.
//!
//! The per-user operations are full key-space scans by design: the session
//! set is small enough that exact membership correctness is worth more than
//! an index, and a corrupt record encountered during a destructive sweep is
//! deleted preemptively rather than silently skipped.

use crate::store::KvStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Default session TTL: 7 days.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(604_800);

const NAMESPACE: &str = "session";

/// A stored session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Ordered list of role names
    #[serde(default)]
    pub roles: Vec<String>,

    /// Resource category -> allowed actions
    #[serde(default)]
    pub permissions: HashMap<String, Vec<String>>,

    /// Epoch milliseconds of the last update or touch
    pub last_activity: i64,

    /// Free-form key/value bag
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Epoch milliseconds; set once at creation, immutable thereafter
    pub created_at: i64,
}

impl SessionRecord {
    /// Shallow-merge a partial update into this record and stamp
    /// `last_activity`. Fields absent from the update are left untouched;
    /// present fields replace wholesale (nested maps are not deep-merged).
    /// `created_at` is never modified.
    pub fn apply(&mut self, update: SessionUpdate, now_ms: i64) {
        if let Some(user_id) = update.user_id {
            self.user_id = user_id;
        }
        if let Some(organization_id) = update.organization_id {
            self.organization_id = Some(organization_id);
        }
        if let Some(roles) = update.roles {
            self.roles = roles;
        }
        if let Some(permissions) = update.permissions {
            self.permissions = permissions;
        }
        if let Some(metadata) = update.metadata {
            self.metadata = metadata;
        }
        self.last_activity = now_ms;
    }
}

/// Fields for creating a session. `created_at` and `last_activity` are
/// stamped by the manager.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub user_id: String,
    pub organization_id: Option<String>,
    pub roles: Vec<String>,
    pub permissions: HashMap<String, Vec<String>>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A partial session update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub user_id: Option<String>,
    pub organization_id: Option<String>,
    pub roles: Option<Vec<String>>,
    pub permissions: Option<HashMap<String, Vec<String>>>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Session lifecycle manager over the shared store.
#[derive(Debug, Clone)]
pub struct SessionManager {
    store: KvStore,
}

impl SessionManager {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    fn key(id: &str) -> String {
        format!("{NAMESPACE}:{id}")
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Create a session with the given TTL (default 7 days), overwriting any
    /// pre-existing record at that id. Returns whether the write succeeded.
    pub async fn create(&self, id: &str, data: NewSession, ttl: Option<Duration>) -> bool {
        let now = Self::now_ms();
        let record = SessionRecord {
            user_id: data.user_id,
            organization_id: data.organization_id,
            roles: data.roles,
            permissions: data.permissions,
            last_activity: now,
            metadata: data.metadata,
            created_at: now,
        };

        self.write(id, &record, ttl.unwrap_or(DEFAULT_SESSION_TTL))
            .await
    }

    /// Get a session record, or `None` if absent. Reading is non-mutating:
    /// neither the TTL nor `last_activity` is refreshed.
    pub async fn get(&self, id: &str) -> Option<SessionRecord> {
        let key = Self::key(id);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(session = id, error = %e, "Session read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(session = id, error = %e, "Session record failed to parse");
                None
            }
        }
    }

    /// Merge a partial update into an existing session. The session's
    /// current remaining TTL is preserved; if the TTL has already lapsed the
    /// default TTL is applied instead. Returns false if the session does not
    /// exist (no implicit creation).
    pub async fn update(&self, id: &str, update: SessionUpdate) -> bool {
        let Some(mut record) = self.get(id).await else {
            return false;
        };

        record.apply(update, Self::now_ms());

        let ttl = self.remaining_ttl(id).await;
        self.write(id, &record, ttl).await
    }

    /// Refresh a session's `last_activity` without changing anything else.
    /// Returns false if the session is missing.
    pub async fn touch(&self, id: &str) -> bool {
        self.update(id, SessionUpdate::default()).await
    }

    /// Delete a session. Returns whether a record was removed.
    pub async fn delete(&self, id: &str) -> bool {
        let key = Self::key(id);
        match self.store.delete(&key).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(session = id, error = %e, "Session delete failed");
                false
            }
        }
    }

    /// Delete every session belonging to a user. Scans the full session key
    /// space and parses each record; records that fail to parse are deleted
    /// preemptively. Returns the number of keys deleted.
    pub async fn delete_by_user(&self, user_id: &str) -> u64 {
        let mut deleted = 0;

        for key in self.scan_keys().await {
            let raw = match self.store.get(&key).await {
                Ok(Some(raw)) => raw,
                // expired between scan and read
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Session read failed during user sweep");
                    continue;
                }
            };

            let should_delete = match serde_json::from_str::<SessionRecord>(&raw) {
                Ok(record) => record.user_id == user_id,
                Err(e) => {
                    warn!(key = %key, error = %e, "Deleting unparsable session record");
                    true
                }
            };

            if should_delete && self.store.delete(&key).await.unwrap_or(false) {
                deleted += 1;
            }
        }

        debug!(user = user_id, deleted, "Deleted sessions for user");
        deleted
    }

    /// Extend a session's TTL by `additional` on top of its current
    /// remaining TTL (cumulative, not reset-to-additional). Returns false if
    /// the session has no positive TTL.
    pub async fn extend(&self, id: &str, additional: Duration) -> bool {
        let key = Self::key(id);
        let current = match self.store.ttl(&key).await {
            Ok(ttl) => ttl,
            Err(e) => {
                warn!(session = id, error = %e, "Session TTL lookup failed");
                return false;
            }
        };

        if current <= 0 {
            return false;
        }

        let extended = Duration::from_secs(current as u64) + additional;
        match self.store.expire(&key, extended).await {
            Ok(applied) => applied,
            Err(e) => {
                warn!(session = id, error = %e, "Session extend failed");
                false
            }
        }
    }

    /// Whether a session exists.
    pub async fn exists(&self, id: &str) -> bool {
        match self.store.exists(&Self::key(id)).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(session = id, error = %e, "Session exists check failed");
                false
            }
        }
    }

    /// All live sessions for a user, as `(session_id, record)` pairs. Same
    /// full-scan approach as [`delete_by_user`](Self::delete_by_user) but
    /// non-destructive: unparsable records are skipped, not deleted.
    pub async fn get_active_sessions(&self, user_id: &str) -> Vec<(String, SessionRecord)> {
        let mut sessions = Vec::new();

        for key in self.scan_keys().await {
            let raw = match self.store.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Session read failed during enumeration");
                    continue;
                }
            };

            match serde_json::from_str::<SessionRecord>(&raw) {
                Ok(record) if record.user_id == user_id => {
                    let id = key
                        .strip_prefix(&format!("{NAMESPACE}:"))
                        .unwrap_or(&key)
                        .to_string();
                    sessions.push((id, record));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unparsable session record");
                }
            }
        }

        sessions
    }

    /// Total number of live session keys.
    pub async fn count(&self) -> u64 {
        self.scan_keys().await.len() as u64
    }

    /// Defensive sweep: delete session keys whose TTL introspection reports
    /// them expired or non-existent. The store auto-expires sessions itself,
    /// so this usually returns 0 and exists to reconcile edge cases.
    pub async fn cleanup(&self) -> u64 {
        let mut deleted = 0;

        for key in self.scan_keys().await {
            match self.store.ttl(&key).await {
                Ok(-2) => {
                    if self.store.delete(&key).await.unwrap_or(false) {
                        deleted += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Session TTL lookup failed during cleanup");
                }
            }
        }

        debug!(deleted, "Session cleanup sweep finished");
        deleted
    }

    async fn scan_keys(&self) -> Vec<String> {
        match self.store.keys_matching(&format!("{NAMESPACE}:*")).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Session key scan failed");
                Vec::new()
            }
        }
    }

    async fn remaining_ttl(&self, id: &str) -> Duration {
        match self.store.ttl(&Self::key(id)).await {
            Ok(ttl) if ttl > 0 => Duration::from_secs(ttl as u64),
            Ok(_) => DEFAULT_SESSION_TTL,
            Err(e) => {
                warn!(session = id, error = %e, "Session TTL lookup failed, using default");
                DEFAULT_SESSION_TTL
            }
        }
    }

    async fn write(&self, id: &str, record: &SessionRecord, ttl: Duration) -> bool {
        let key = Self::key(id);
        let payload = match serde_json::to_string(record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(session = id, error = %e, "Failed to encode session record");
                return false;
            }
        };

        match self.store.set_with_ttl(&key, &payload, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session = id, error = %e, "Session write failed");
                false
            }
        }
    }
}

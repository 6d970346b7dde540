//! # Analytics Collector
//!
//! Day-bucketed event recording and counter aggregation. Every event is
//! stored twice: appended to a per-type-per-day list for replay and audit,
//! and folded into per-day counters keyed by dimension (organization, user,
//! asset, plus a type-level total). Both representations carry the same
//! 30-day retention TTL, re-applied on every write, so late events in an
//! existing day bucket extend that bucket's life.
//!
//! Analytics share the cache's fail-soft policy: a store error during a read
//! or write is logged and degrades to a neutral result. An analytics outage
//! never fails the request that generated the event.

use crate::store::KvStore;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

/// Retention applied to every analytics key on each write.
pub const RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);

/// Event types the daily-stats table reports on.
pub const KNOWN_EVENT_TYPES: [&str; 6] = [
    "asset_view",
    "asset_download",
    "asset_upload",
    "asset_share",
    "search",
    "login",
];

const NAMESPACE: &str = "analytics";

/// A portal analytics event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// Epoch milliseconds
    pub timestamp: i64,
}

impl AnalyticsEvent {
    /// A new event of the given type, stamped with the current time.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            user_id: None,
            organization_id: None,
            asset_id: None,
            metadata: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// The UTC day bucket this event falls into.
    fn day(&self) -> NaiveDate {
        DateTime::from_timestamp_millis(self.timestamp)
            .map(|dt| dt.date_naive())
            .unwrap_or_else(|| Utc::now().date_naive())
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse the trailing `YYYY-MM-DD` segment out of an analytics key name.
fn trailing_date(key: &str) -> Option<NaiveDate> {
    let segment = key.rsplit(':').next()?;
    NaiveDate::parse_from_str(segment, "%Y-%m-%d").ok()
}

fn events_key(event_type: &str, date: &str) -> String {
    format!("{NAMESPACE}:events:{event_type}:{date}")
}

fn counter_key(event_type: &str, dimension: &str, date: &str) -> String {
    format!("{NAMESPACE}:count:{event_type}:{dimension}:{date}")
}

/// The dimension counters an event increments: a type-level total plus one
/// counter per dimension present on the event.
fn counter_keys(event: &AnalyticsEvent, date: &str) -> Vec<String> {
    let mut keys = vec![counter_key(&event.event_type, "total", date)];

    if let Some(org) = &event.organization_id {
        keys.push(counter_key(&event.event_type, &format!("org:{org}"), date));
    }
    if let Some(user) = &event.user_id {
        keys.push(counter_key(&event.event_type, &format!("user:{user}"), date));
    }
    if let Some(asset) = &event.asset_id {
        keys.push(counter_key(&event.event_type, &format!("asset:{asset}"), date));
    }

    keys
}

/// Time-bucketed event recorder and aggregator over the shared store.
#[derive(Debug, Clone)]
pub struct AnalyticsCollector {
    store: KvStore,
}

impl AnalyticsCollector {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Record an event: one atomic batch appends it to its per-type-per-day
    /// list and increments every applicable dimension counter, re-applying
    /// the 30-day retention TTL to each touched key. Returns whether the
    /// write succeeded.
    pub async fn record_event(&self, event: &AnalyticsEvent) -> bool {
        let date = date_key(event.day());
        let list_key = events_key(&event.event_type, &date);
        let counters = counter_keys(event, &date);

        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event_type = %event.event_type, error = %e, "Failed to encode analytics event");
                return false;
            }
        };

        match self
            .store
            .analytics_record(&list_key, &payload, &counters, RETENTION)
            .await
        {
            Ok(()) => {
                debug!(event_type = %event.event_type, date = %date, "Recorded analytics event");
                true
            }
            Err(e) => {
                warn!(event_type = %event.event_type, error = %e, "Analytics write failed");
                false
            }
        }
    }

    /// Sum the daily counters for one `(type, dimension)` across an
    /// inclusive date range. `dimension` is e.g. `org:42`, `user:7`,
    /// `asset:19`, or `total`.
    pub async fn get_event_count(
        &self,
        event_type: &str,
        dimension: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> u64 {
        let mut total = 0;

        for date in date_range(start, end) {
            let key = counter_key(event_type, dimension, &date_key(date));
            match self.store.get(&key).await {
                Ok(Some(raw)) => total += raw.parse::<u64>().unwrap_or(0),
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Counter read failed, skipping day");
                }
            }
        }

        total
    }

    /// Paged read of the raw event list for one day. Unparsable entries are
    /// skipped.
    pub async fn get_events(
        &self,
        event_type: &str,
        date: NaiveDate,
        limit: usize,
        offset: usize,
    ) -> Vec<AnalyticsEvent> {
        if limit == 0 {
            return Vec::new();
        }

        let key = events_key(event_type, &date_key(date));
        let start = offset as isize;
        let stop = (offset + limit - 1) as isize;

        let entries = match self.store.lrange(&key, start, stop).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(key = %key, error = %e, "Event list read failed");
                return Vec::new();
            }
        };

        entries
            .iter()
            .filter_map(|raw| match serde_json::from_str(raw) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unparsable analytics event");
                    None
                }
            })
            .collect()
    }

    /// A `date -> {event_type -> count}` table for one organization over an
    /// inclusive date range, covering the known event types.
    pub async fn get_daily_stats(
        &self,
        org_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> BTreeMap<String, HashMap<String, u64>> {
        let dimension = format!("org:{org_id}");
        let mut stats = BTreeMap::new();

        for date in date_range(start, end) {
            let day = date_key(date);
            let mut per_type = HashMap::new();

            for event_type in KNOWN_EVENT_TYPES {
                let key = counter_key(event_type, &dimension, &day);
                let count = match self.store.get(&key).await {
                    Ok(Some(raw)) => raw.parse::<u64>().unwrap_or(0),
                    Ok(None) => 0,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Counter read failed, reporting 0");
                        0
                    }
                };
                per_type.insert(event_type.to_string(), count);
            }

            stats.insert(day, per_type);
        }

        stats
    }

    /// The most-counted assets for one event type on one day, as
    /// `(asset_id, count)` pairs sorted descending, truncated to `limit`.
    ///
    /// Asset counters are recorded portal-wide (the dimension is the asset
    /// id alone); `org_id` scopes the request for tracing and future
    /// filtering, not the scan.
    pub async fn get_top_assets(
        &self,
        org_id: &str,
        event_type: &str,
        date: NaiveDate,
        limit: usize,
    ) -> Vec<(String, u64)> {
        let day = date_key(date);
        let pattern = counter_key(event_type, "asset:*", &day);

        let keys = match self.store.keys_matching(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(org = org_id, pattern = %pattern, error = %e, "Asset counter scan failed");
                return Vec::new();
            }
        };

        let prefix = format!("{NAMESPACE}:count:{event_type}:asset:");
        let suffix = format!(":{day}");

        let mut ranked = Vec::new();
        for key in keys {
            let Some(asset_id) = key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_suffix(suffix.as_str()))
            else {
                continue;
            };

            let count = match self.store.get(&key).await {
                Ok(Some(raw)) => raw.parse::<u64>().unwrap_or(0),
                Ok(None) => 0,
                Err(e) => {
                    warn!(key = %key, error = %e, "Asset counter read failed, skipping");
                    continue;
                }
            };

            ranked.push((asset_id.to_string(), count));
        }

        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);

        debug!(org = org_id, event_type, date = %day, results = ranked.len(), "Top assets query");
        ranked
    }

    /// Backstop sweep independent of the TTLs set on write: scan all
    /// analytics keys, parse the trailing date segment out of each name, and
    /// delete keys older than the cutoff. Returns the number deleted.
    pub async fn cleanup(&self, days_to_keep: u32) -> u64 {
        let cutoff = Utc::now().date_naive() - chrono::Days::new(days_to_keep as u64);

        let keys = match self.store.keys_matching(&format!("{NAMESPACE}:*")).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Analytics key scan failed during cleanup");
                return 0;
            }
        };

        let stale: Vec<String> = keys
            .into_iter()
            .filter(|key| matches!(trailing_date(key), Some(date) if date < cutoff))
            .collect();

        match self.store.delete_many(&stale).await {
            Ok(deleted) => {
                debug!(deleted, cutoff = %cutoff, "Analytics cleanup sweep finished");
                deleted
            }
            Err(e) => {
                warn!(error = %e, "Analytics cleanup delete failed");
                0
            }
        }
    }
}

fn date_range(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_keys_include_present_dimensions_only() {
        let mut event = AnalyticsEvent::new("asset_view");
        event.organization_id = Some("org-1".to_string());
        event.asset_id = Some("asset-9".to_string());

        let keys = counter_keys(&event, "2026-08-26");
        assert_eq!(
            keys,
            vec![
                "analytics:count:asset_view:total:2026-08-26".to_string(),
                "analytics:count:asset_view:org:org-1:2026-08-26".to_string(),
                "analytics:count:asset_view:asset:asset-9:2026-08-26".to_string(),
            ]
        );
    }

    #[test]
    fn test_event_day_from_timestamp() {
        let mut event = AnalyticsEvent::new("login");
        // 2026-08-26T12:00:00Z
        event.timestamp = 1_787_745_600_000;
        assert_eq!(event.day(), NaiveDate::from_ymd_opt(2026, 8, 26).unwrap());
    }

    #[test]
    fn test_trailing_date_parsing() {
        assert_eq!(
            trailing_date("analytics:count:login:total:2026-01-15"),
            NaiveDate::from_ymd_opt(2026, 1, 15)
        );
        assert_eq!(trailing_date("analytics:count:login:total"), None);
        assert_eq!(trailing_date("analytics:events:login:not-a-date"), None);
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let start = NaiveDate::from_ymd_opt(2026, 8, 24).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 8, 26).unwrap();
        let days: Vec<NaiveDate> = date_range(start, end).collect();
        assert_eq!(days.len(), 3);
        assert_eq!(days[0], start);
        assert_eq!(days[2], end);
    }

    #[test]
    fn test_event_round_trips_with_renamed_type_field() {
        let mut event = AnalyticsEvent::new("search");
        event.user_id = Some("u-1".to_string());

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"search\""));

        let back: AnalyticsEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}

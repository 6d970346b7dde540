//! # Cache Invalidation
//!
//! Coordinated multi-key invalidation for portal entities. When an entity
//! mutates, every cached read derived from it must be purged; each function
//! here fans out the independent deletes for one entity concurrently and
//! awaits them all before returning.
//!
//! The fan-out is best-effort, not transactional: if one delete fails the
//! others still complete, and no rollback exists. Callers treat a failure as
//! "invalidation incomplete" and may safely re-issue the call, since every
//! delete is idempotent.

use crate::cache::CacheManager;
use crate::store::KvStore;
use futures::join;
use tracing::debug;

/// Entity-level invalidation over the portal's cache namespaces.
#[derive(Debug, Clone)]
pub struct CacheInvalidator {
    orgs: CacheManager,
    users: CacheManager,
    assets: CacheManager,
    tiers: CacheManager,
}

impl CacheInvalidator {
    /// Build the invalidator and its four entity-scoped cache managers over
    /// the shared store.
    pub fn new(store: KvStore) -> Self {
        Self {
            orgs: CacheManager::new(store.clone(), "org"),
            users: CacheManager::new(store.clone(), "user"),
            assets: CacheManager::new(store.clone(), "asset"),
            tiers: CacheManager::new(store, "tier"),
        }
    }

    /// The organization cache namespace.
    pub fn organizations(&self) -> &CacheManager {
        &self.orgs
    }

    /// The user cache namespace.
    pub fn users(&self) -> &CacheManager {
        &self.users
    }

    /// The asset cache namespace.
    pub fn assets(&self) -> &CacheManager {
        &self.assets
    }

    /// The tier cache namespace.
    pub fn tiers(&self) -> &CacheManager {
        &self.tiers
    }

    /// Purge everything cached for an organization: its details, settings,
    /// and usage entries, its per-org user listings, and every asset-cache
    /// entry scoped to it.
    pub async fn invalidate_organization(&self, org_id: &str) {
        let details_key = format!("details:{org_id}");
        let settings_key = format!("settings:{org_id}");
        let usage_key = format!("usage:{org_id}");
        let users_pattern = format!("users:{org_id}:*");
        let assets_pattern = format!("org:{org_id}:*");
        join!(
            self.orgs.delete(&details_key),
            self.orgs.delete(&settings_key),
            self.orgs.delete(&usage_key),
            self.orgs.delete_pattern(&users_pattern),
            self.assets.delete_pattern(&assets_pattern),
        );
        debug!(org = org_id, "Invalidated organization cache entries");
    }

    /// Purge a user's cached profile, permissions, and roles.
    pub async fn invalidate_user(&self, user_id: &str) {
        let profile_key = format!("profile:{user_id}");
        let permissions_key = format!("permissions:{user_id}");
        let roles_key = format!("roles:{user_id}");
        join!(
            self.users.delete(&profile_key),
            self.users.delete(&permissions_key),
            self.users.delete(&roles_key),
        );
        debug!(user = user_id, "Invalidated user cache entries");
    }

    /// Purge an asset's cached details and metadata, plus the owning
    /// organization's usage entry (usage aggregates depend on asset state).
    pub async fn invalidate_asset(&self, asset_id: &str, org_id: &str) {
        let details_key = format!("details:{asset_id}");
        let metadata_key = format!("metadata:{asset_id}");
        let usage_key = format!("usage:{org_id}");
        join!(
            self.assets.delete(&details_key),
            self.assets.delete(&metadata_key),
            self.orgs.delete(&usage_key),
        );
        debug!(asset = asset_id, org = org_id, "Invalidated asset cache entries");
    }

    /// Purge a subscription tier's cached details, limits, and features.
    pub async fn invalidate_tier(&self, tier_id: &str) {
        let details_key = format!("details:{tier_id}");
        let limits_key = format!("limits:{tier_id}");
        let features_key = format!("features:{tier_id}");
        join!(
            self.tiers.delete(&details_key),
            self.tiers.delete(&limits_key),
            self.tiers.delete(&features_key),
        );
        debug!(tier = tier_id, "Invalidated tier cache entries");
    }
}

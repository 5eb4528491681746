use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use moka::{future::Cache, policy::EvictionPolicy};
use vigil_model::{CategoryScores, ContentFingerprint};

/// A classification stored under its fingerprint. Immutable once inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    pub fingerprint: ContentFingerprint,
    pub scores: CategoryScores,
    pub inserted_at: DateTime<Utc>,
}

/// Fingerprint -> result map bounded by item count, with TTL expiry and
/// least-recently-used eviction.
#[derive(Debug, Clone)]
pub struct ResultCache {
    entries: Cache<ContentFingerprint, Arc<CachedResult>>,
}

impl ResultCache {
    pub fn new(max_items: u64, ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_items)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { entries }
    }

    pub async fn get(
        &self,
        fingerprint: &ContentFingerprint,
    ) -> Option<Arc<CachedResult>> {
        self.entries.get(fingerprint).await
    }

    /// Store a result unless one is already present. Classification is
    /// idempotent per fingerprint, so the first stored value wins and is
    /// returned.
    pub async fn insert(
        &self,
        fingerprint: ContentFingerprint,
        scores: CategoryScores,
    ) -> Arc<CachedResult> {
        self.entries
            .get_with(fingerprint, async move {
                Arc::new(CachedResult {
                    fingerprint,
                    scores,
                    inserted_at: Utc::now(),
                })
            })
            .await
    }

    pub fn contains(&self, fingerprint: &ContentFingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Entry count after pending evictions have been applied.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

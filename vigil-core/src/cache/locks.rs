use std::{fmt, sync::Arc, time::Duration};

use moka::{policy::EvictionPolicy, sync::Cache};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;
use vigil_model::ContentFingerprint;

/// Registry of per-fingerprint exclusive locks.
///
/// Lookups go through `get_with`, which runs the constructor at most once
/// per key even under concurrent first access, so racing callers always
/// share one lock. The registry is bounded: evicting an entry only drops
/// the registry's handle. Holders and waiters keep the lock alive through
/// their own `Arc`.
#[derive(Clone)]
pub struct KeyedLockRegistry {
    locks: Cache<ContentFingerprint, Arc<Mutex<()>>>,
}

impl fmt::Debug for KeyedLockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLockRegistry")
            .field("entries", &self.locks.entry_count())
            .finish()
    }
}

impl KeyedLockRegistry {
    pub fn new(max_items: u64, ttl: Duration) -> Self {
        let locks = Cache::builder()
            .max_capacity(max_items)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { locks }
    }

    /// Get or atomically create the lock for `fingerprint`.
    pub fn lock_for(&self, fingerprint: &ContentFingerprint) -> Arc<Mutex<()>> {
        self.locks
            .get_with(*fingerprint, || Arc::new(Mutex::new(())))
    }

    /// Wait for exclusive ownership of `fingerprint`. Dropping the guard
    /// releases it.
    pub async fn acquire(
        &self,
        fingerprint: ContentFingerprint,
    ) -> KeyedLockGuard {
        let lock = self.lock_for(&fingerprint);
        let guard = lock.lock_owned().await;
        trace!(fingerprint = %fingerprint.short(), "keyed lock acquired");
        KeyedLockGuard {
            fingerprint,
            _guard: guard,
        }
    }

    pub fn contains(&self, fingerprint: &ContentFingerprint) -> bool {
        self.locks.contains_key(fingerprint)
    }

    /// Entry count after pending evictions have been applied.
    pub fn len(&self) -> u64 {
        self.locks.run_pending_tasks();
        self.locks.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive hold on one fingerprint.
pub struct KeyedLockGuard {
    fingerprint: ContentFingerprint,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLockGuard {
    pub fn fingerprint(&self) -> &ContentFingerprint {
        &self.fingerprint
    }
}

impl fmt::Debug for KeyedLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLockGuard")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl Drop for KeyedLockGuard {
    fn drop(&mut self) {
        trace!(fingerprint = %self.fingerprint.short(), "keyed lock released");
    }
}

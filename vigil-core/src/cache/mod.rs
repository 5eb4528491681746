//! Bounded, TTL-evicting in-memory maps keyed by content fingerprint.

mod locks;
mod results;

pub use locks::{KeyedLockGuard, KeyedLockRegistry};
pub use results::{CachedResult, ResultCache};

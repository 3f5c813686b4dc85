//! Time-bounded membership cache of processed item identities.
//!
//! An identity is "new" when absent or when its entry is older than the TTL.
//! Lookups share a read lock; marking takes the write lock. The pipeline uses
//! [`DedupStore::check_and_mark`] so two concurrent fetches of the same item
//! cannot both pass.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::model::ItemId;

pub const DEFAULT_TTL_SECS: i64 = 24 * 60 * 60;

#[derive(Debug)]
pub struct DedupStore {
    ttl: Duration,
    seen: RwLock<HashMap<ItemId, DateTime<Utc>>>,
}

impl Default for DedupStore {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TTL_SECS))
    }
}

impl DedupStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ttl.max(Duration::zero()),
            seen: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn fresh(&self, first_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(first_seen) < self.ttl
    }

    /// True if `id` has not been seen within the TTL window.
    pub fn is_new(&self, id: &ItemId, now: DateTime<Utc>) -> bool {
        let guard = self.seen.read().unwrap_or_else(PoisonError::into_inner);
        match guard.get(id) {
            Some(&ts) => !self.fresh(ts, now),
            None => true,
        }
    }

    /// Record `id` as seen at `now`, replacing any expired entry.
    pub fn mark_seen(&self, id: &ItemId, now: DateTime<Utc>) {
        let mut guard = self.seen.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(id.clone(), now);
    }

    /// Atomic `is_new` + `mark_seen`. Returns true exactly once per TTL window.
    pub fn check_and_mark(&self, id: &ItemId, now: DateTime<Utc>) -> bool {
        let mut guard = self.seen.write().unwrap_or_else(PoisonError::into_inner);
        match guard.get(id) {
            Some(&ts) if self.fresh(ts, now) => false,
            _ => {
                guard.insert(id.clone(), now);
                true
            }
        }
    }

    /// Drop expired entries. Returns how many were evicted.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.seen.write().unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        let ttl = self.ttl;
        guard.retain(|_, ts| now.signed_duration_since(*ts) < ttl);
        before - guard.len()
    }

    pub fn len(&self) -> usize {
        self.seen.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn expired_entry_is_new_again_and_refreshed() {
        let store = DedupStore::new(Duration::hours(1));
        let id = ItemId::derive(Some("g"), None, "", "");

        assert!(store.check_and_mark(&id, t0()));
        assert!(!store.check_and_mark(&id, t0() + Duration::minutes(59)));
        assert!(store.check_and_mark(&id, t0() + Duration::minutes(60)));
        // refreshed at +60m
        assert!(!store.is_new(&id, t0() + Duration::minutes(100)));
    }

    #[test]
    fn sweep_evicts_only_expired() {
        let store = DedupStore::new(Duration::hours(1));
        let old = ItemId::derive(Some("old"), None, "", "");
        let young = ItemId::derive(Some("young"), None, "", "");
        store.mark_seen(&old, t0());
        store.mark_seen(&young, t0() + Duration::minutes(30));

        assert_eq!(store.sweep(t0() + Duration::minutes(61)), 1);
        assert_eq!(store.len(), 1);
        assert!(!store.is_new(&young, t0() + Duration::minutes(61)));
    }
}

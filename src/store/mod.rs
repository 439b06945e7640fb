//! Shared coupon pool and claim ledger.
//!
//! The store is the only shared mutable state in the service. Every method is
//! a single blocking round-trip and must be safe to call from many threads at
//! once; callers run them on the tokio blocking pool.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{ClaimRecord, Coupon, HistoryEntry, Identity};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: u64,
    pub unclaimed: u64,
}

pub trait CouponStore: Send + Sync + 'static {
    /// Drop every coupon and ledger entry and insert `codes` as a fresh,
    /// fully unclaimed pool. Returns the new pool size.
    fn replace_pool(&self, codes: &[String]) -> Result<usize, StoreError>;

    fn pool_stats(&self) -> Result<PoolStats, StoreError>;

    /// Atomically mark the lowest-id unclaimed coupon as claimed at `now`.
    ///
    /// The mark is conditional on the row still being unclaimed; a caller that
    /// loses the race re-selects. `None` means no unclaimed coupon exists.
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Coupon>, StoreError>;

    /// Unclaim the whole pool, but only while no unclaimed coupon exists.
    /// Returns how many coupons were reset.
    fn reset_if_exhausted(&self) -> Result<u64, StoreError>;

    fn append_claim(
        &self,
        identity: &Identity,
        coupon_id: i64,
        claimed_at: DateTime<Utc>,
    ) -> Result<ClaimRecord, StoreError>;

    /// Most recent ledger entry matching the identity by IP or cookie.
    fn latest_claim(&self, identity: &Identity) -> Result<Option<ClaimRecord>, StoreError>;

    /// Every ledger entry matching the identity, newest first.
    fn claim_history(&self, identity: &Identity) -> Result<Vec<HistoryEntry>, StoreError>;
}

/// Open a store from a connection string.
///
/// `memory://` selects the in-process backend. `sqlite://path`, `sqlite:path`
/// or a bare filesystem path select SQLite.
pub fn open(url: &str) -> Result<Arc<dyn CouponStore>, StoreError> {
    let url = url.trim();
    if url == "memory" || url.starts_with("memory:") {
        return Ok(Arc::new(MemoryStore::new()));
    }

    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);

    // Each operation opens its own connection, so a private in-memory
    // SQLite database would be empty on every call.
    if path.is_empty() || path == ":memory:" || path.contains("://") {
        return Err(StoreError::UnsupportedUrl(url.to_string()));
    }

    Ok(Arc::new(SqliteStore::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UNKNOWN_CODE;

    #[test]
    fn rejects_foreign_schemes() {
        assert!(matches!(
            open("mongodb://localhost/coupons"),
            Err(StoreError::UnsupportedUrl(_))
        ));
        assert!(matches!(open("sqlite://:memory:"), Err(StoreError::UnsupportedUrl(_))));
        assert!(matches!(open(""), Err(StoreError::UnsupportedUrl(_))));
    }

    #[test]
    fn memory_scheme_opens_empty_pool() {
        let store = open("memory://").unwrap();
        assert_eq!(store.pool_stats().unwrap(), PoolStats { total: 0, unclaimed: 0 });
    }

    fn pool(store: &dyn CouponStore, n: usize) {
        let codes: Vec<String> = (0..n).map(|i| format!("POOL{i:04}")).collect();
        assert_eq!(store.replace_pool(&codes).unwrap(), n);
    }

    fn at(minute: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + minute * 60, 0).unwrap()
    }

    /// Behavior every backend has to agree on.
    fn exercise(store: &dyn CouponStore) {
        pool(store, 3);
        assert_eq!(store.pool_stats().unwrap(), PoolStats { total: 3, unclaimed: 3 });

        // Lowest id first, claimed_at stamped.
        let first = store.claim_next(at(0)).unwrap().unwrap();
        assert_eq!(first.code, "POOL0000");
        assert_eq!(first.claimed_at, Some(at(0)));
        assert_eq!(store.claim_next(at(0)).unwrap().unwrap().code, "POOL0001");

        // Reset is a no-op while anything is still unclaimed.
        assert_eq!(store.reset_if_exhausted().unwrap(), 0);
        assert_eq!(store.claim_next(at(0)).unwrap().unwrap().code, "POOL0002");
        assert_eq!(store.claim_next(at(0)).unwrap(), None);

        assert_eq!(store.reset_if_exhausted().unwrap(), 3);
        assert_eq!(store.pool_stats().unwrap().unclaimed, 3);
        assert_eq!(store.claim_next(at(1)).unwrap().unwrap().code, "POOL0000");

        // Ledger: OR-match, newest first.
        let alice = Identity::new("10.0.0.1", "alice-cookie");
        let alice_new_ip = Identity::new("10.0.0.9", "alice-cookie");
        let bob = Identity::new("10.0.0.2", "bob-cookie");
        let bob_same_ip = Identity::new("10.0.0.2", "other-cookie");
        store.append_claim(&alice, 1, at(0)).unwrap();
        store.append_claim(&alice, 2, at(5)).unwrap();
        store.append_claim(&bob, 3, at(3)).unwrap();

        let latest = store.latest_claim(&alice_new_ip).unwrap().unwrap();
        assert_eq!(latest.coupon_id, Some(2));
        assert_eq!(latest.claimed_at, at(5));
        assert_eq!(store.latest_claim(&bob_same_ip).unwrap().unwrap().coupon_id, Some(3));
        assert_eq!(
            store.latest_claim(&Identity::new("10.9.9.9", "stranger")).unwrap(),
            None
        );

        let history = store.claim_history(&alice).unwrap();
        let codes: Vec<&str> = history.iter().map(|h| h.code.as_str()).collect();
        assert_eq!(codes, ["POOL0001", "POOL0000"]);
        assert!(store
            .claim_history(&bob)
            .unwrap()
            .iter()
            .all(|h| h.code == "POOL0002"));

        // Ledger rows pointing at a coupon that does not exist.
        store.append_claim(&bob, 999, at(10)).unwrap();
        assert_eq!(store.claim_history(&bob).unwrap()[0].code, UNKNOWN_CODE);

        // Reseeding wipes the ledger too.
        pool(store, 1);
        assert_eq!(store.latest_claim(&alice).unwrap(), None);
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn sqlite_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&SqliteStore::open(dir.path().join("contract.db")).unwrap());
    }

    #[test]
    fn empty_pool_stays_empty_after_reset() {
        let store = MemoryStore::new();
        assert_eq!(store.reset_if_exhausted().unwrap(), 0);
        assert_eq!(store.claim_next(at(0)).unwrap(), None);
    }

    #[test]
    fn sqlite_scheme_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let store = open(&format!("sqlite://{}", path.display())).unwrap();
        store.replace_pool(&["AAAA0000".to_string()]).unwrap();
        assert!(path.exists());
    }
}

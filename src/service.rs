//! Claim orchestration: cooldown check, allocation, ledger append, history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::cooldown::{Cooldown, CooldownStatus};
use crate::error::ClaimError;
use crate::model::{Coupon, HistoryEntry, Identity};
use crate::store::CouponStore;

/// Take one coupon, resetting the pool whenever it is exhausted.
///
/// Only a pool with no coupons at all is `PoolEmpty`. A reset that finds
/// nothing to do means a concurrent caller already reset the pool (and may
/// have drained it again), so the claim is retried.
pub fn allocate(store: &dyn CouponStore, now: DateTime<Utc>) -> Result<Coupon, ClaimError> {
    loop {
        if let Some(coupon) = store.claim_next(now)? {
            return Ok(coupon);
        }

        let reset = store.reset_if_exhausted()?;
        if reset > 0 {
            warn!(reset, "coupon pool exhausted, all coupons returned to the pool");
            continue;
        }

        if store.pool_stats()?.total == 0 {
            return Err(ClaimError::PoolEmpty);
        }
        debug!("pool reset by a concurrent claim, retrying");
    }
}

#[derive(Clone)]
pub struct ClaimService {
    store: Arc<dyn CouponStore>,
    cooldown: Cooldown,
}

impl ClaimService {
    pub fn new(store: Arc<dyn CouponStore>, cooldown: Cooldown) -> Self {
        Self { store, cooldown }
    }

    fn check(
        store: &dyn CouponStore,
        cooldown: Cooldown,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<CooldownStatus, ClaimError> {
        let last = store.latest_claim(identity)?.map(|c| c.claimed_at);
        Ok(cooldown.status(last, now))
    }

    /// Cooldown status for `identity` at `now`.
    pub async fn status_at(
        &self,
        identity: Identity,
        now: DateTime<Utc>,
    ) -> Result<CooldownStatus, ClaimError> {
        let store = Arc::clone(&self.store);
        let cooldown = self.cooldown;
        tokio::task::spawn_blocking(move || Self::check(store.as_ref(), cooldown, &identity, now)).await?
    }

    pub async fn status(&self, identity: Identity) -> Result<CooldownStatus, ClaimError> {
        self.status_at(identity, Utc::now()).await
    }

    /// Run one claim for `identity` at `now`.
    ///
    /// The cooldown check, allocation and ledger append run as one blocking
    /// task, which keeps running even if the awaiting request is dropped.
    pub async fn claim_at(
        &self,
        identity: Identity,
        now: DateTime<Utc>,
    ) -> Result<Coupon, ClaimError> {
        let store = Arc::clone(&self.store);
        let cooldown = self.cooldown;
        tokio::task::spawn_blocking(move || {
            let store = store.as_ref();
            let status = Self::check(store, cooldown, &identity, now)?;
            if !status.can_claim {
                return Err(ClaimError::CooldownActive {
                    minutes_remaining: status.minutes_remaining,
                });
            }

            let coupon = allocate(store, now)?;

            // The coupon stays claimed even when the ledger write fails.
            if let Err(e) = store.append_claim(&identity, coupon.id, now) {
                error!(
                    error = %e,
                    coupon_id = coupon.id,
                    ip = %identity.ip_address,
                    "coupon allocated but claim record not written"
                );
            }

            info!(coupon_id = coupon.id, ip = %identity.ip_address, "coupon claimed");
            Ok(coupon)
        })
        .await?
    }

    pub async fn claim(&self, identity: Identity) -> Result<Coupon, ClaimError> {
        self.claim_at(identity, Utc::now()).await
    }

    /// Claims matching `identity`, newest first.
    pub async fn history(&self, identity: Identity) -> Result<Vec<HistoryEntry>, ClaimError> {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || store.claim_history(&identity)).await??)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::{ClaimRecord, HistoryEntry};
    use crate::store::{MemoryStore, PoolStats};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// On its first reset, plays a concurrent caller that resets the pool
    /// and claims every coupon before this caller gets to look again.
    struct LosesFirstReset {
        inner: MemoryStore,
        raced: AtomicBool,
    }

    impl CouponStore for LosesFirstReset {
        fn replace_pool(&self, codes: &[String]) -> Result<usize, StoreError> {
            self.inner.replace_pool(codes)
        }
        fn pool_stats(&self) -> Result<PoolStats, StoreError> {
            self.inner.pool_stats()
        }
        fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Coupon>, StoreError> {
            self.inner.claim_next(now)
        }
        fn reset_if_exhausted(&self) -> Result<u64, StoreError> {
            if self.raced.swap(true, Ordering::SeqCst) {
                return self.inner.reset_if_exhausted();
            }
            self.inner.reset_if_exhausted()?;
            while self.inner.claim_next(Utc::now())?.is_some() {}
            Ok(0)
        }
        fn append_claim(
            &self,
            identity: &Identity,
            coupon_id: i64,
            claimed_at: DateTime<Utc>,
        ) -> Result<ClaimRecord, StoreError> {
            self.inner.append_claim(identity, coupon_id, claimed_at)
        }
        fn latest_claim(&self, identity: &Identity) -> Result<Option<ClaimRecord>, StoreError> {
            self.inner.latest_claim(identity)
        }
        fn claim_history(&self, identity: &Identity) -> Result<Vec<HistoryEntry>, StoreError> {
            self.inner.claim_history(identity)
        }
    }

    #[test]
    fn allocate_resets_a_drained_pool() {
        let store = MemoryStore::new();
        store.replace_pool(&["AAAAAAAA".to_string()]).unwrap();
        assert_eq!(allocate(&store, Utc::now()).unwrap().code, "AAAAAAAA");
        // Pool is now fully claimed; the next allocation resets it.
        assert_eq!(allocate(&store, Utc::now()).unwrap().code, "AAAAAAAA");
        assert_eq!(store.pool_stats().unwrap().unclaimed, 0);
    }

    #[test]
    fn allocate_on_empty_pool_is_fatal() {
        let store = MemoryStore::new();
        assert!(matches!(allocate(&store, Utc::now()), Err(ClaimError::PoolEmpty)));
    }

    #[test]
    fn losing_the_reset_race_retries_instead_of_failing() {
        let store = LosesFirstReset {
            inner: MemoryStore::new(),
            raced: AtomicBool::new(false),
        };
        store
            .replace_pool(&["AAAAAAAA".to_string(), "BBBBBBBB".to_string()])
            .unwrap();
        while store.claim_next(Utc::now()).unwrap().is_some() {}

        let coupon = allocate(&store, Utc::now()).expect("pool is not empty");
        assert_eq!(coupon.code, "AAAAAAAA");
        assert!(store.raced.load(Ordering::SeqCst));
    }
}

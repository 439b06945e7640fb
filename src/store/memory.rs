use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{CouponStore, PoolStats};
use crate::error::StoreError;
use crate::model::{ClaimRecord, Coupon, HistoryEntry, Identity, UNKNOWN_CODE};

#[derive(Default)]
struct Tables {
    /// Kept in ascending id order.
    coupons: Vec<Coupon>,
    claims: Vec<ClaimRecord>,
    next_claim_id: i64,
}

/// In-process store for single-instance deployments and tests.
///
/// Each method holds the table lock for its whole body, which is what makes
/// every method one atomic step, the same guarantee a single SQL statement
/// gives the SQLite backend.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger entries matching `identity`, newest first.
    fn matching<'a>(tables: &'a Tables, identity: &Identity) -> Vec<&'a ClaimRecord> {
        let mut found: Vec<&ClaimRecord> =
            tables.claims.iter().filter(|c| identity.matches(c)).collect();
        found.sort_by(|a, b| b.claimed_at.cmp(&a.claimed_at).then(b.id.cmp(&a.id)));
        found
    }
}

impl CouponStore for MemoryStore {
    fn replace_pool(&self, codes: &[String]) -> Result<usize, StoreError> {
        let mut seen = std::collections::HashSet::with_capacity(codes.len());
        for code in codes {
            if !seen.insert(code.as_str()) {
                return Err(StoreError::DuplicateCode(code.clone()));
            }
        }

        let mut tables = self.tables.lock();
        tables.claims.clear();
        tables.next_claim_id = 0;
        tables.coupons = codes
            .iter()
            .enumerate()
            .map(|(i, code)| Coupon {
                id: i as i64 + 1,
                code: code.clone(),
                is_claimed: false,
                claimed_at: None,
            })
            .collect();
        Ok(tables.coupons.len())
    }

    fn pool_stats(&self) -> Result<PoolStats, StoreError> {
        let tables = self.tables.lock();
        Ok(PoolStats {
            total: tables.coupons.len() as u64,
            unclaimed: tables.coupons.iter().filter(|c| !c.is_claimed).count() as u64,
        })
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Coupon>, StoreError> {
        let mut tables = self.tables.lock();
        let Some(coupon) = tables.coupons.iter_mut().find(|c| !c.is_claimed) else {
            return Ok(None);
        };
        coupon.is_claimed = true;
        coupon.claimed_at = Some(now);
        Ok(Some(coupon.clone()))
    }

    fn reset_if_exhausted(&self) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock();
        if tables.coupons.iter().any(|c| !c.is_claimed) {
            return Ok(0);
        }
        for coupon in tables.coupons.iter_mut() {
            coupon.is_claimed = false;
            coupon.claimed_at = None;
        }
        Ok(tables.coupons.len() as u64)
    }

    fn append_claim(
        &self,
        identity: &Identity,
        coupon_id: i64,
        claimed_at: DateTime<Utc>,
    ) -> Result<ClaimRecord, StoreError> {
        let mut tables = self.tables.lock();
        tables.next_claim_id += 1;
        let record = ClaimRecord {
            id: tables.next_claim_id,
            ip_address: identity.ip_address.clone(),
            cookie_token: identity.cookie_token.clone(),
            coupon_id: Some(coupon_id),
            claimed_at,
        };
        tables.claims.push(record.clone());
        Ok(record)
    }

    fn latest_claim(&self, identity: &Identity) -> Result<Option<ClaimRecord>, StoreError> {
        let tables = self.tables.lock();
        Ok(Self::matching(&tables, identity).first().map(|c| (*c).clone()))
    }

    fn claim_history(&self, identity: &Identity) -> Result<Vec<HistoryEntry>, StoreError> {
        let tables = self.tables.lock();
        Ok(Self::matching(&tables, identity)
            .into_iter()
            .map(|claim| {
                let code = claim
                    .coupon_id
                    .and_then(|id| tables.coupons.iter().find(|c| c.id == id))
                    .map(|c| c.code.clone())
                    .unwrap_or_else(|| UNKNOWN_CODE.to_string());
                HistoryEntry {
                    code,
                    claimed_at: claim.claimed_at,
                }
            })
            .collect())
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::debug;

use super::{CouponStore, PoolStats};
use crate::error::StoreError;
use crate::model::{ClaimRecord, Coupon, HistoryEntry, Identity, UNKNOWN_CODE};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         CREATE TABLE IF NOT EXISTS coupons(
            id INTEGER PRIMARY KEY NOT NULL,
            code TEXT NOT NULL UNIQUE,
            is_claimed INTEGER NOT NULL DEFAULT 0,
            claimed_at INTEGER
         );
         CREATE INDEX IF NOT EXISTS coupons_unclaimed_idx ON coupons(is_claimed, id);
         CREATE TABLE IF NOT EXISTS claims(
            id INTEGER PRIMARY KEY NOT NULL,
            ip_address TEXT NOT NULL,
            cookie_token TEXT NOT NULL,
            coupon_id INTEGER,
            claimed_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS claims_ip_idx ON claims(ip_address, claimed_at);
         CREATE INDEX IF NOT EXISTS claims_cookie_idx ON claims(cookie_token, claimed_at);",
    )?;
    Ok(())
}

fn timestamp(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

/// SQLite-backed store. Every call opens its own connection, so concurrent
/// callers never share a handle and SQLite's own locking orders the writes.
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        apply_schema(&store.connect()?)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

impl CouponStore for SqliteStore {
    fn replace_pool(&self, codes: &[String]) -> Result<usize, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute_batch("DELETE FROM claims; DELETE FROM coupons;")?;
        {
            let mut stmt = tx.prepare("INSERT INTO coupons(code, is_claimed) VALUES(?1, 0)")?;
            for code in codes {
                stmt.execute(params![code]).map_err(|e| match e {
                    rusqlite::Error::SqliteFailure(ref f, _)
                        if f.code == ErrorCode::ConstraintViolation =>
                    {
                        StoreError::DuplicateCode(code.clone())
                    }
                    other => StoreError::Sqlite(other),
                })?;
            }
        }
        let total: i64 = tx.query_row("SELECT COUNT(*) FROM coupons", [], |r| r.get(0))?;
        tx.commit()?;
        Ok(total as usize)
    }

    fn pool_stats(&self) -> Result<PoolStats, StoreError> {
        let conn = self.connect()?;
        let (total, unclaimed): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_claimed = 0), 0) FROM coupons",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(PoolStats {
            total: total as u64,
            unclaimed: unclaimed as u64,
        })
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Coupon>, StoreError> {
        let conn = self.connect()?;
        let at = now.timestamp_millis();
        let claimed_at = timestamp(at)?;

        loop {
            let candidate: Option<(i64, String)> = conn
                .query_row(
                    "SELECT id, code FROM coupons WHERE is_claimed = 0 ORDER BY id LIMIT 1",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;

            let Some((id, code)) = candidate else {
                return Ok(None);
            };

            let changed = conn.execute(
                "UPDATE coupons SET is_claimed = 1, claimed_at = ?2 WHERE id = ?1 AND is_claimed = 0",
                params![id, at],
            )?;
            if changed == 1 {
                return Ok(Some(Coupon {
                    id,
                    code,
                    is_claimed: true,
                    claimed_at: Some(claimed_at),
                }));
            }
            debug!(coupon_id = id, "coupon taken by a concurrent claim, reselecting");
        }
    }

    fn reset_if_exhausted(&self) -> Result<u64, StoreError> {
        let conn = self.connect()?;
        let reset = conn.execute(
            "UPDATE coupons SET is_claimed = 0, claimed_at = NULL
             WHERE NOT EXISTS (SELECT 1 FROM coupons WHERE is_claimed = 0)",
            [],
        )?;
        Ok(reset as u64)
    }

    fn append_claim(
        &self,
        identity: &Identity,
        coupon_id: i64,
        claimed_at: DateTime<Utc>,
    ) -> Result<ClaimRecord, StoreError> {
        let conn = self.connect()?;
        let at = claimed_at.timestamp_millis();
        conn.execute(
            "INSERT INTO claims(ip_address, cookie_token, coupon_id, claimed_at) VALUES(?1, ?2, ?3, ?4)",
            params![identity.ip_address, identity.cookie_token, coupon_id, at],
        )?;
        Ok(ClaimRecord {
            id: conn.last_insert_rowid(),
            ip_address: identity.ip_address.clone(),
            cookie_token: identity.cookie_token.clone(),
            coupon_id: Some(coupon_id),
            claimed_at: timestamp(at)?,
        })
    }

    fn latest_claim(&self, identity: &Identity) -> Result<Option<ClaimRecord>, StoreError> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT id, ip_address, cookie_token, coupon_id, claimed_at FROM claims
                 WHERE ip_address = ?1 OR cookie_token = ?2
                 ORDER BY claimed_at DESC, id DESC LIMIT 1",
                params![identity.ip_address, identity.cookie_token],
                |r| {
                    Ok(ClaimRecord {
                        id: r.get(0)?,
                        ip_address: r.get(1)?,
                        cookie_token: r.get(2)?,
                        coupon_id: r.get(3)?,
                        claimed_at: timestamp(r.get(4)?)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn claim_history(&self, identity: &Identity) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT c.code, l.claimed_at FROM claims l
             LEFT JOIN coupons c ON c.id = l.coupon_id
             WHERE l.ip_address = ?1 OR l.cookie_token = ?2
             ORDER BY l.claimed_at DESC, l.id DESC",
        )?;
        let rows = stmt.query_map(params![identity.ip_address, identity.cookie_token], |r| {
            let code: Option<String> = r.get(0)?;
            Ok(HistoryEntry {
                code: code.unwrap_or_else(|| UNKNOWN_CODE.to_string()),
                claimed_at: timestamp(r.get(1)?)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn codes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("CODE{i:04}")).collect()
    }

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(dir.path().join("coupons.db")).expect("open store");
        (dir, store)
    }

    #[test]
    fn schema_is_idempotent() {
        let (dir, store) = temp_store();
        store.replace_pool(&codes(3)).unwrap();
        let reopened = SqliteStore::open(dir.path().join("coupons.db")).unwrap();
        assert_eq!(reopened.pool_stats().unwrap().total, 3);
    }

    #[test]
    fn duplicate_codes_are_rejected_atomically() {
        let (_dir, store) = temp_store();
        store.replace_pool(&codes(2)).unwrap();
        let dupes = vec!["SAME0000".to_string(), "SAME0000".to_string()];
        assert!(matches!(
            store.replace_pool(&dupes),
            Err(StoreError::DuplicateCode(code)) if code == "SAME0000"
        ));
        // The failed transaction leaves the previous pool intact.
        assert_eq!(store.pool_stats().unwrap().total, 2);
    }

    #[test]
    fn parallel_claims_never_share_a_coupon() {
        let (_dir, store) = temp_store();
        store.replace_pool(&codes(40)).unwrap();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..5)
                        .map(|_| store.claim_next(Utc::now()).unwrap().unwrap().id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "coupon {id} allocated twice");
            }
        }
        assert_eq!(seen.len(), 40);
        assert_eq!(store.pool_stats().unwrap().unclaimed, 0);
        assert_eq!(store.claim_next(Utc::now()).unwrap(), None);
    }

    #[test]
    fn deleted_coupon_shows_as_unknown() {
        let (_dir, store) = temp_store();
        store.replace_pool(&codes(1)).unwrap();
        let identity = Identity::new("10.0.0.1", "aa");
        let coupon = store.claim_next(Utc::now()).unwrap().unwrap();
        store.append_claim(&identity, coupon.id, Utc::now()).unwrap();

        let conn = Connection::open(store.path()).unwrap();
        conn.execute("DELETE FROM coupons WHERE id = ?1", params![coupon.id])
            .unwrap();

        let history = store.claim_history(&identity).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].code, UNKNOWN_CODE);
    }
}

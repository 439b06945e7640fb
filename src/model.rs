//! Coupon pool and claim ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Code shown for a ledger entry whose coupon row no longer exists.
pub const UNKNOWN_CODE: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    pub is_claimed: bool,
    pub claimed_at: Option<DateTime<Utc>>,
}

/// Who is asking. Matching against the ledger is an OR over both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub ip_address: String,
    pub cookie_token: String,
}

impl Identity {
    pub fn new(ip_address: impl Into<String>, cookie_token: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            cookie_token: cookie_token.into(),
        }
    }

    /// True if either the IP or the cookie token equals the record's.
    pub fn matches(&self, record: &ClaimRecord) -> bool {
        record.ip_address == self.ip_address || record.cookie_token == self.cookie_token
    }
}

/// One row of the append-only claim ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: i64,
    pub ip_address: String,
    pub cookie_token: String,
    pub coupon_id: Option<i64>,
    pub claimed_at: DateTime<Utc>,
}

/// A ledger row resolved to its coupon code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub code: String,
    pub claimed_at: DateTime<Utc>,
}

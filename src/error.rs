//! Error types for the coupon store and the claim flow.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported store url: {0}")]
    UnsupportedUrl(String),
    #[error("duplicate coupon code: {0}")]
    DuplicateCode(String),
}

/// Everything that can end a claim, status or history request early.
#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("cooldown active: {minutes_remaining} minute(s) remaining")]
    CooldownActive { minutes_remaining: u64 },
    #[error("coupon pool is empty even after reset")]
    PoolEmpty,
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("store task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ClaimError {
    /// Whether this is an expected, user-facing outcome rather than a fault.
    pub fn is_expected(&self) -> bool {
        matches!(self, ClaimError::CooldownActive { .. })
    }
}

//! Per-identity claim cooldown.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

const MS_PER_MINUTE: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownStatus {
    pub can_claim: bool,
    pub minutes_remaining: u64,
}

impl CooldownStatus {
    pub const CLEAR: CooldownStatus = CooldownStatus {
        can_claim: true,
        minutes_remaining: 0,
    };

    fn from_minutes(minutes_remaining: u64) -> Self {
        Self {
            can_claim: minutes_remaining == 0,
            minutes_remaining,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Cooldown {
    window: Duration,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn from_minutes(minutes: u64) -> Self {
        Self::new(Duration::minutes(minutes.min(u32::MAX as u64) as i64))
    }

    /// Whole minutes until the identity may claim again, rounded up.
    ///
    /// Returns 0 once `now - last_claim >= window`. A `last_claim` in the
    /// future counts as zero elapsed time, so the result never exceeds the
    /// window length in minutes.
    pub fn minutes_remaining(&self, last_claim: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
        let window_ms = self.window.num_milliseconds();
        let elapsed_ms = (now - last_claim).num_milliseconds().max(0);
        if elapsed_ms >= window_ms {
            return 0;
        }
        let left = window_ms - elapsed_ms;
        ((left + MS_PER_MINUTE - 1) / MS_PER_MINUTE) as u64
    }

    /// Status for an identity whose most recent claim is `last_claim`.
    pub fn status(&self, last_claim: Option<DateTime<Utc>>, now: DateTime<Utc>) -> CooldownStatus {
        match last_claim {
            None => CooldownStatus::CLEAR,
            Some(at) => CooldownStatus::from_minutes(self.minutes_remaining(at, now)),
        }
    }
}

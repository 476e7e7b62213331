//! Card time: seconds since 2000-01-01 00:00 UTC

use chrono::Utc;

/// Unix timestamp of 2000-01-01 00:00:00 UTC
pub const CARD_EPOCH: i64 = 946_684_800;

/// Source of the current card time
pub trait TimeSource {
    fn now(&self) -> u64;
}

/// Wall clock via `chrono`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> u64 {
        to_card_time(Utc::now().timestamp())
    }
}

/// Constant clock for reproducible images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub u64);

impl TimeSource for FixedClock {
    fn now(&self) -> u64 {
        self.0
    }
}

/// Convert a Unix timestamp to card time, saturating at the card epoch
pub fn to_card_time(unix_seconds: i64) -> u64 {
    unix_seconds.saturating_sub(CARD_EPOCH).max(0) as u64
}

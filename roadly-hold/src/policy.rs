use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Timing and size limits applied to every hold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HoldPolicy {
    pub hold_seconds: i64,
    pub extension_seconds: i64,
    pub max_extensions: u32,
    pub max_seats_per_session: usize,
    /// Sales close this many minutes before departure.
    pub booking_cutoff_minutes: i64,
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            hold_seconds: 600,
            extension_seconds: 300,
            max_extensions: 1,
            max_seats_per_session: 6,
            booking_cutoff_minutes: 30,
        }
    }
}

impl HoldPolicy {
    pub fn hold_duration(&self) -> Duration {
        Duration::seconds(self.hold_seconds)
    }

    pub fn extension(&self) -> Duration {
        Duration::seconds(self.extension_seconds)
    }

    pub fn cutoff(&self) -> Duration {
        Duration::minutes(self.booking_cutoff_minutes)
    }

    pub fn extensions_left(&self, used: u32) -> u32 {
        self.max_extensions.saturating_sub(used)
    }
}

use chrono::{DateTime, Utc};
use roadly_core::{SeatLayout, SeatLock};
use serde::Serialize;

/// Seat counts for one trip at one instant.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Occupancy {
    pub capacity: usize,
    pub available: usize,
    pub held: usize,
    pub booked: usize,
}

impl Occupancy {
    /// Counts only locks on seats that are part of the layout. Lapsed holds
    /// count as available.
    pub fn from_locks(layout: &SeatLayout, locks: &[SeatLock], now: DateTime<Utc>) -> Self {
        let mut held = 0;
        let mut booked = 0;
        for lock in locks.iter().filter(|l| layout.contains(l.seat_number())) {
            match lock {
                SeatLock::Booked(_) => booked += 1,
                SeatLock::Held(hold) if hold.is_live(now) => held += 1,
                SeatLock::Held(_) => {}
            }
        }
        let capacity = layout.capacity();
        Self {
            capacity,
            available: capacity.saturating_sub(held + booked),
            held,
            booked,
        }
    }

    /// Share of seats that are held or booked.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            1.0 - (self.available as f64 / self.capacity as f64)
        }
    }
}

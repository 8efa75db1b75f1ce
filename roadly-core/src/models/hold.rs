use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Short-lived claim of one seat by one checkout session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatHold {
    pub trip_id: Uuid,
    pub seat_number: String,
    pub session_id: String,
    pub held_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub extensions: u32,
}

impl SeatHold {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookedSeat {
    pub trip_id: Uuid,
    pub seat_number: String,
    pub booking_code: String,
    pub booked_at: DateTime<Utc>,
}

/// Stored state of a seat. A seat with no lock is available.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SeatLock {
    Held(SeatHold),
    Booked(BookedSeat),
}

impl SeatLock {
    pub fn seat_number(&self) -> &str {
        match self {
            SeatLock::Held(hold) => &hold.seat_number,
            SeatLock::Booked(booked) => &booked.seat_number,
        }
    }

    /// Booked seats are always active; holds only until they lapse.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self {
            SeatLock::Held(hold) => hold.is_live(now),
            SeatLock::Booked(_) => true,
        }
    }

    pub fn is_held_by(&self, session_id: &str, now: DateTime<Utc>) -> bool {
        matches!(self, SeatLock::Held(hold) if hold.session_id == session_id && hold.is_live(now))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Every live hold the session has on the trip after the claim.
    Claimed(Vec<SeatHold>),
    /// Seats that are booked or held by someone else; nothing was claimed.
    Conflict(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Seats the session no longer held; nothing was committed.
    Lost(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_hold_liveness() {
        let now = Utc::now();
        let lock = SeatLock::Held(SeatHold {
            trip_id: Uuid::new_v4(),
            seat_number: "A1".to_string(),
            session_id: "guest-1".to_string(),
            held_at: now,
            expires_at: now + Duration::minutes(10),
            extensions: 0,
        });

        assert!(lock.is_active(now));
        assert!(lock.is_held_by("guest-1", now));
        assert!(!lock.is_held_by("guest-2", now));
        assert!(!lock.is_active(now + Duration::minutes(10)));
        assert!(!lock.is_held_by("guest-1", now + Duration::minutes(11)));
    }

    #[test]
    fn test_booked_lock_never_lapses() {
        let lock = SeatLock::Booked(BookedSeat {
            trip_id: Uuid::new_v4(),
            seat_number: "B2".to_string(),
            booking_code: "BK23456789".to_string(),
            booked_at: Utc::now(),
        });
        assert!(lock.is_active(Utc::now() + Duration::days(30)));
        assert_eq!(lock.seat_number(), "B2");

        let json = serde_json::to_value(&lock).unwrap();
        assert_eq!(json["state"], "booked");
    }
}

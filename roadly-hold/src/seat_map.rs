use chrono::{DateTime, Utc};
use roadly_catalog::Occupancy;
use roadly_core::{SeatLock, Trip};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatState {
    Available,
    Held { mine: bool, expires_at: DateTime<Utc> },
    Booked,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeatView {
    pub number: String,
    pub deck: u8,
    pub row: u16,
    pub column: u16,
    pub fare: i64,
    #[serde(flatten)]
    pub state: SeatState,
}

/// Seat-by-seat picture of a trip as one viewer sees it.
#[derive(Debug, Clone, Serialize)]
pub struct SeatMap {
    pub trip_id: Uuid,
    pub currency: String,
    pub seats: Vec<SeatView>,
    pub occupancy: Occupancy,
    pub generated_at: DateTime<Utc>,
}

impl SeatMap {
    pub fn build(trip: &Trip, locks: &[SeatLock], viewer: Option<&str>, now: DateTime<Utc>) -> Self {
        let by_seat: HashMap<&str, &SeatLock> = locks
            .iter()
            .filter(|lock| lock.is_active(now))
            .map(|lock| (lock.seat_number(), lock))
            .collect();

        let seats = trip
            .seat_layout
            .seats
            .iter()
            .map(|seat| {
                let state = match by_seat.get(seat.number.as_str()) {
                    Some(SeatLock::Booked(_)) => SeatState::Booked,
                    Some(SeatLock::Held(hold)) => SeatState::Held {
                        mine: viewer == Some(hold.session_id.as_str()),
                        expires_at: hold.expires_at,
                    },
                    None => SeatState::Available,
                };
                SeatView {
                    number: seat.number.clone(),
                    deck: seat.deck,
                    row: seat.row,
                    column: seat.column,
                    fare: seat.fare_override.unwrap_or(trip.fare),
                    state,
                }
            })
            .collect();

        Self {
            trip_id: trip.id,
            currency: trip.currency.clone(),
            seats,
            occupancy: Occupancy::from_locks(&trip.seat_layout, locks, now),
            generated_at: now,
        }
    }

    pub fn seat(&self, number: &str) -> Option<&SeatView> {
        self.seats.iter().find(|s| s.number == number)
    }
}

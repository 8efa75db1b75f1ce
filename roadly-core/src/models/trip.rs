use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Scheduled,
    Departed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Scheduled => "SCHEDULED",
            TripStatus::Departed => "DEPARTED",
            TripStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SCHEDULED" => Some(TripStatus::Scheduled),
            "DEPARTED" => Some(TripStatus::Departed),
            "CANCELLED" => Some(TripStatus::Cancelled),
            _ => None,
        }
    }
}

/// One physical seat on the coach.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatDef {
    pub number: String,
    pub deck: u8,
    pub row: u16,
    pub column: u16,
    #[serde(default)]
    pub fare_override: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SeatLayout {
    pub seats: Vec<SeatDef>,
}

impl SeatLayout {
    /// Regular layout: rows lettered from `A`, columns numbered from 1.
    /// Upper-deck seats carry a `U` prefix (`UA1`).
    pub fn grid(decks: u8, rows: u16, columns: u16) -> Self {
        let mut seats = Vec::with_capacity(decks as usize * rows as usize * columns as usize);
        for deck in 1..=decks {
            let prefix = if deck > 1 { "U" } else { "" };
            for row in 0..rows {
                let letter = (b'A' + (row % 26) as u8) as char;
                for column in 1..=columns {
                    seats.push(SeatDef {
                        number: format!("{}{}{}", prefix, letter, column),
                        deck,
                        row: row + 1,
                        column,
                        fare_override: None,
                    });
                }
            }
        }
        Self { seats }
    }

    pub fn capacity(&self) -> usize {
        self.seats.len()
    }

    pub fn seat(&self, number: &str) -> Option<&SeatDef> {
        self.seats.iter().find(|s| s.number == number)
    }

    pub fn contains(&self, number: &str) -> bool {
        self.seat(number).is_some()
    }
}

/// A scheduled departure on a route, with its own seat inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub route_code: String,
    pub origin: String,
    pub destination: String,
    pub departure_at: DateTime<Utc>,
    pub fare: i64,
    pub currency: String,
    pub status: TripStatus,
    pub seat_layout: SeatLayout,
    pub created_at: DateTime<Utc>,
}

impl Trip {
    /// Fare for a single seat, `None` for seats not on this coach.
    pub fn seat_fare(&self, number: &str) -> Option<i64> {
        self.seat_layout
            .seat(number)
            .map(|seat| seat.fare_override.unwrap_or(self.fare))
    }

    /// Last instant at which seats may still be held or sold.
    pub fn sales_close_at(&self, cutoff: Duration) -> DateTime<Utc> {
        self.departure_at - cutoff
    }

    pub fn accepts_holds(&self, now: DateTime<Utc>, cutoff: Duration) -> bool {
        self.status == TripStatus::Scheduled && now < self.sales_close_at(cutoff)
    }
}

use chrono::{DateTime, Utc};
use roadly_core::{Booking, BookingStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingEvent {
    Confirm,
    Cancel,
    Expire,
}

impl fmt::Display for BookingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BookingEvent::Confirm => "CONFIRM",
            BookingEvent::Cancel => "CANCEL",
            BookingEvent::Expire => "EXPIRE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: BookingStatus, event: BookingEvent },

    #[error("Booking is already {0}")]
    AlreadyInState(BookingStatus),
}

/// Lifecycle of a booking:
///
/// ```text
/// HELD ──CONFIRM──> CONFIRMED ──CANCEL──> CANCELLED
///   │ ──CANCEL───> CANCELLED
///   └ ──EXPIRE───> EXPIRED
/// ```
pub struct BookingStateMachine;

impl BookingStateMachine {
    pub fn next(from: BookingStatus, event: BookingEvent) -> Result<BookingStatus, TransitionError> {
        use BookingEvent::*;
        use BookingStatus::*;

        match (from, event) {
            (Held, Confirm) => Ok(Confirmed),
            (Held, Cancel) | (Confirmed, Cancel) => Ok(Cancelled),
            (Held, Expire) => Ok(Expired),
            (Confirmed, Confirm) | (Cancelled, Cancel) | (Expired, Expire) => {
                Err(TransitionError::AlreadyInState(from))
            }
            _ => Err(TransitionError::InvalidTransition { from, event }),
        }
    }

    /// Moves the booking and stamps its timestamps. Returns the previous status.
    pub fn apply(
        booking: &mut Booking,
        event: BookingEvent,
        now: DateTime<Utc>,
    ) -> Result<BookingStatus, TransitionError> {
        let previous = booking.status;
        let next = Self::next(previous, event)?;
        booking.status = next;
        booking.updated_at = now;
        match next {
            BookingStatus::Confirmed => booking.confirmed_at = Some(now),
            BookingStatus::Cancelled => booking.cancelled_at = Some(now),
            _ => {}
        }
        Ok(previous)
    }
}

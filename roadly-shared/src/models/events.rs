use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why seats went back to the available pool.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseReason {
    Released,
    Expired,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SeatsHeldEvent {
    pub trip_id: Uuid,
    pub seat_numbers: Vec<String>,
    pub expires_at: i64,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SeatsReleasedEvent {
    pub trip_id: Uuid,
    pub seat_numbers: Vec<String>,
    pub reason: ReleaseReason,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SeatsBookedEvent {
    pub trip_id: Uuid,
    pub seat_numbers: Vec<String>,
    pub booking_code: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookingCreatedEvent {
    pub booking_code: String,
    pub trip_id: Uuid,
    pub seat_numbers: Vec<String>,
    pub final_price: i64,
    pub currency: String,
    pub voucher_code: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookingConfirmedEvent {
    pub booking_code: String,
    pub trip_id: Uuid,
    pub seat_numbers: Vec<String>,
    pub final_price: i64,
    pub currency: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookingCancelledEvent {
    pub booking_code: String,
    pub trip_id: Uuid,
    pub reason: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookingExpiredEvent {
    pub booking_code: String,
    pub trip_id: Uuid,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaymentSettledEvent {
    pub payment_code: String,
    pub booking_code: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub timestamp: i64,
}

/// Envelope for everything the engine publishes. Serialized with a `type` tag so
/// consumers of a shared topic can dispatch on it.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    SeatsHeld(SeatsHeldEvent),
    SeatsReleased(SeatsReleasedEvent),
    SeatsBooked(SeatsBookedEvent),
    BookingCreated(BookingCreatedEvent),
    BookingConfirmed(BookingConfirmedEvent),
    BookingCancelled(BookingCancelledEvent),
    BookingExpired(BookingExpiredEvent),
    PaymentSettled(PaymentSettledEvent),
}

impl DomainEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::SeatsHeld(_) => "seats.held",
            DomainEvent::SeatsReleased(_) => "seats.released",
            DomainEvent::SeatsBooked(_) => "seats.booked",
            DomainEvent::BookingCreated(_) => "booking.created",
            DomainEvent::BookingConfirmed(_) => "booking.confirmed",
            DomainEvent::BookingCancelled(_) => "booking.cancelled",
            DomainEvent::BookingExpired(_) => "booking.expired",
            DomainEvent::PaymentSettled(_) => "payment.settled",
        }
    }

    /// Partition key: seat events are keyed by trip so a consumer sees them in order.
    pub fn key(&self) -> String {
        match self {
            DomainEvent::SeatsHeld(e) => e.trip_id.to_string(),
            DomainEvent::SeatsReleased(e) => e.trip_id.to_string(),
            DomainEvent::SeatsBooked(e) => e.trip_id.to_string(),
            DomainEvent::BookingCreated(e) => e.booking_code.clone(),
            DomainEvent::BookingConfirmed(e) => e.booking_code.clone(),
            DomainEvent::BookingCancelled(e) => e.booking_code.clone(),
            DomainEvent::BookingExpired(e) => e.booking_code.clone(),
            DomainEvent::PaymentSettled(e) => e.booking_code.clone(),
        }
    }

    /// Trip the event concerns, used to filter per-trip seat streams.
    pub fn seat_trip_id(&self) -> Option<Uuid> {
        match self {
            DomainEvent::SeatsHeld(e) => Some(e.trip_id),
            DomainEvent::SeatsReleased(e) => Some(e.trip_id),
            DomainEvent::SeatsBooked(e) => Some(e.trip_id),
            _ => None,
        }
    }
}

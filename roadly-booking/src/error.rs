use roadly_catalog::CatalogError;
use roadly_core::CoreError;
use roadly_hold::HoldError;

use crate::state::TransitionError;
use crate::voucher::VoucherError;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Booking not found: {0}")]
    NotFound(String),

    #[error("Booking belongs to another session")]
    NotOwner,

    #[error("Invalid contact info: {0}")]
    InvalidContact(String),

    #[error("Invalid booking request: {0}")]
    InvalidRequest(String),

    #[error("Seats not held by this session: {}", .0.join(", "))]
    SeatsNotHeld(Vec<String>),

    #[error("Seats already in booking {code}: {}", .seats.join(", "))]
    SeatsInOtherBooking { code: String, seats: Vec<String> },

    #[error("Booking {0} has expired")]
    Expired(String),

    #[error("Booking {0} has no settled payment")]
    PaymentRequired(String),

    #[error("Booking {0} can no longer be cancelled")]
    CancellationClosed(String),

    #[error("Booking {0} was modified concurrently")]
    Conflict(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Hold(#[from] HoldError),

    #[error(transparent)]
    Voucher(#[from] VoucherError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment not found: {0}")]
    NotFound(String),

    #[error("Invalid callback signature")]
    InvalidSignature,

    #[error("Malformed callback: {0}")]
    MalformedCallback(String),

    #[error("Amount mismatch: expected {expected}, received {received}")]
    AmountMismatch { expected: i64, received: i64 },

    #[error("Booking {code} cannot be paid: {reason}")]
    NotPayable { code: String, reason: String },

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

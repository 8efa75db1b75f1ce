pub mod clock;
pub mod codes;
pub mod gateway;
pub mod models;
pub mod repository;

pub use clock::{Clock, ManualClock, SystemClock};
pub use models::booking::{Booking, BookingStatus, ContactInfo};
pub use models::hold::{BookedSeat, ClaimOutcome, CommitOutcome, SeatHold, SeatLock};
pub use models::payment::{Payment, PaymentMethod, PaymentStatus};
pub use models::trip::{SeatDef, SeatLayout, Trip, TripStatus};
pub use models::voucher::{DiscountRule, Voucher};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Payment gateway error: {0}")]
    GatewayError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::InternalError(format!("serialization: {}", err))
    }
}

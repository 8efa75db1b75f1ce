use roadly_core::CoreError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum HoldError {
    #[error("No seats requested")]
    EmptySelection,

    #[error("Seat {0} requested more than once")]
    DuplicateSeat(String),

    #[error("Trip not found: {0}")]
    TripNotFound(Uuid),

    #[error("Trip {0} is closed for sales")]
    TripClosed(Uuid),

    #[error("Seats not on this trip: {}", .0.join(", "))]
    UnknownSeats(Vec<String>),

    #[error("At most {max} seats per session, requested {requested}")]
    TooManySeats { requested: usize, max: usize },

    #[error("Seats unavailable: {}", .0.join(", "))]
    Conflict(Vec<String>),

    #[error("No active hold on this trip")]
    NoActiveHold,

    #[error("Hold already extended {max} time(s)")]
    ExtensionLimit { max: u32 },

    #[error("Hold lost for seats: {}", .0.join(", "))]
    HoldLost(Vec<String>),

    #[error(transparent)]
    Storage(#[from] CoreError),
}

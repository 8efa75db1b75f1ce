pub mod error;
pub mod manager;
pub mod policy;
pub mod seat_map;

pub use error::HoldError;
pub use manager::{HoldSummary, SeatLockManager};
pub use policy::HoldPolicy;
pub use seat_map::{SeatMap, SeatState, SeatView};
pub use roadly_shared::models::events::ReleaseReason;

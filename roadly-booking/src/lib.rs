pub mod error;
pub mod gateway;
pub mod reaper;
pub mod reconciler;
pub mod service;
pub mod state;
pub mod voucher;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{BookingError, PaymentError};
pub use gateway::MockPaymentGateway;
pub use reaper::{HoldExpiryReaper, SweepReport};
pub use reconciler::{sign_payload, CallbackOutcome, PaymentCallback, PaymentReconciler};
pub use service::{Actor, BookingService, CreateBooking};
pub use state::{BookingEvent, BookingStateMachine, TransitionError};
pub use voucher::{NewVoucher, VoucherError, VoucherQuote, VoucherValidator};

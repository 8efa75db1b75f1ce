pub mod booking;
pub mod hold;
pub mod payment;
pub mod trip;
pub mod voucher;

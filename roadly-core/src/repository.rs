use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roadly_shared::DomainEvent;
use uuid::Uuid;

use crate::models::booking::{Booking, BookingStatus};
use crate::models::hold::{ClaimOutcome, CommitOutcome, SeatHold, SeatLock};
use crate::models::payment::{Payment, PaymentStatus};
use crate::models::trip::Trip;
use crate::models::voucher::Voucher;
use crate::CoreResult;

/// Repository trait for trip and seat-layout data
#[async_trait]
pub trait TripRepository: Send + Sync {
    async fn save_trip(&self, trip: &Trip) -> CoreResult<()>;

    async fn get_trip(&self, id: Uuid) -> CoreResult<Option<Trip>>;

    async fn list_trips(&self) -> CoreResult<Vec<Trip>>;
}

/// Storage of seat locks. Every method is a single atomic step against the
/// backing store; the no-double-booking invariant lives here.
#[async_trait]
pub trait SeatLockStore: Send + Sync {
    /// Claim `seats` for `session_id` until `expires_at`, all or nothing.
    /// Seats the session already holds live are kept as they are.
    async fn claim(
        &self,
        trip_id: Uuid,
        seats: &[String],
        session_id: &str,
        expires_at: DateTime<Utc>,
        extensions: u32,
        now: DateTime<Utc>,
    ) -> CoreResult<ClaimOutcome>;

    /// Move every live hold of the session on the trip to `expires_at` and
    /// bump its extension count. Returns the updated holds.
    async fn extend(
        &self,
        trip_id: Uuid,
        session_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<SeatHold>>;

    /// Drop holds owned by the session (all of them when `seats` is `None`).
    async fn release(
        &self,
        trip_id: Uuid,
        session_id: &str,
        seats: Option<&[String]>,
    ) -> CoreResult<Vec<String>>;

    /// Turn live holds into booked seats.
    async fn commit(
        &self,
        trip_id: Uuid,
        session_id: &str,
        seats: &[String],
        booking_code: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<CommitOutcome>;

    /// Free seats booked under `booking_code`. Returns the seats freed.
    async fn unbook(
        &self,
        trip_id: Uuid,
        seats: &[String],
        booking_code: &str,
    ) -> CoreResult<Vec<String>>;

    /// Active locks (booked seats and live holds) on a trip.
    async fn locks_for_trip(&self, trip_id: Uuid, now: DateTime<Utc>) -> CoreResult<Vec<SeatLock>>;

    /// Remove holds that lapsed at or before `now`, returning them.
    async fn purge_expired(&self, now: DateTime<Utc>) -> CoreResult<Vec<SeatHold>>;
}

/// Repository trait for booking data access
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert_booking(&self, booking: &Booking) -> CoreResult<()>;

    async fn get_booking(&self, booking_code: &str) -> CoreResult<Option<Booking>>;

    /// Compare-and-set: writes `booking` only if the stored status is still
    /// `expected`. Returns whether the write happened.
    async fn update_booking(&self, booking: &Booking, expected: BookingStatus) -> CoreResult<bool>;

    async fn list_expired_holds(&self, now: DateTime<Utc>, limit: usize) -> CoreResult<Vec<Booking>>;

    async fn list_held_for_session(&self, trip_id: Uuid, session_id: &str) -> CoreResult<Vec<Booking>>;

    async fn list_for_trip(&self, trip_id: Uuid) -> CoreResult<Vec<Booking>>;
}

/// Repository trait for voucher data access
#[async_trait]
pub trait VoucherRepository: Send + Sync {
    async fn save_voucher(&self, voucher: &Voucher) -> CoreResult<()>;

    async fn get_voucher(&self, code: &str) -> CoreResult<Option<Voucher>>;

    /// Atomically take one use; false when the voucher is missing or exhausted.
    async fn reserve_use(&self, code: &str) -> CoreResult<bool>;

    async fn release_use(&self, code: &str) -> CoreResult<()>;
}

/// Repository trait for payment data access
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> CoreResult<()>;

    async fn get_payment(&self, payment_code: &str) -> CoreResult<Option<Payment>>;

    async fn list_for_booking(&self, booking_code: &str) -> CoreResult<Vec<Payment>>;

    /// Compare-and-set on payment status, like `BookingRepository::update_booking`.
    async fn update_payment(&self, payment: &Payment, expected: PaymentStatus) -> CoreResult<bool>;

    async fn callback_seen(&self, event_id: &str) -> CoreResult<bool>;

    /// Records a gateway callback id. False when it was seen before.
    async fn record_callback(&self, event_id: &str, received_at: DateTime<Utc>) -> CoreResult<bool>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> CoreResult<()>;
}

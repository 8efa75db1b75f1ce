use chrono::{DateTime, Utc};
use roadly_catalog::FareCalculator;
use roadly_core::codes;
use roadly_core::gateway::PaymentGateway;
use roadly_core::repository::{BookingRepository, EventPublisher, PaymentRepository};
use roadly_core::{Booking, BookingStatus, Clock, ContactInfo, Payment, PaymentStatus};
use roadly_hold::{HoldError, HoldSummary, ReleaseReason, SeatLockManager};
use roadly_shared::models::events::{
    BookingCancelledEvent, BookingConfirmedEvent, BookingCreatedEvent, BookingExpiredEvent,
    PaymentSettledEvent,
};
use roadly_shared::DomainEvent;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::BookingError;
use crate::state::{BookingEvent, BookingStateMachine, TransitionError};
use crate::voucher::VoucherValidator;

/// Who is acting on a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Customer(String),
    Operator(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBooking {
    pub trip_id: Uuid,
    pub seats: Vec<String>,
    pub contact_info: ContactInfo,
    #[serde(default)]
    pub voucher_code: Option<String>,
}

pub struct BookingService {
    bookings: Arc<dyn BookingRepository>,
    payments: Arc<dyn PaymentRepository>,
    holds: Arc<SeatLockManager>,
    vouchers: Arc<VoucherValidator>,
    fares: FareCalculator,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl BookingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        payments: Arc<dyn PaymentRepository>,
        holds: Arc<SeatLockManager>,
        vouchers: Arc<VoucherValidator>,
        fares: FareCalculator,
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { bookings, payments, holds, vouchers, fares, gateway, events, clock }
    }

    pub fn holds(&self) -> &Arc<SeatLockManager> {
        &self.holds
    }

    pub async fn create_booking(&self, session_id: &str, request: CreateBooking) -> Result<Booking, BookingError> {
        let seats = normalize_seats(&request.seats)?;
        let contact_info = validate_contact(request.contact_info)?;
        let trip = self.holds.trip(request.trip_id).await?;

        let hold = self
            .holds
            .session_hold(trip.id, session_id)
            .await?
            .ok_or_else(|| BookingError::SeatsNotHeld(seats.clone()))?;
        let missing: Vec<String> = seats.iter().filter(|s| !hold.seats.contains(s)).cloned().collect();
        if !missing.is_empty() {
            return Err(BookingError::SeatsNotHeld(missing));
        }

        let now = self.clock.now();
        for other in self.bookings.list_held_for_session(trip.id, session_id).await? {
            if other.is_hold_expired(now) {
                continue;
            }
            let overlap: Vec<String> = seats.iter().filter(|s| other.seats.contains(s)).cloned().collect();
            if !overlap.is_empty() {
                return Err(BookingError::SeatsInOtherBooking { code: other.booking_code, seats: overlap });
            }
        }

        let quote = self.fares.quote(&trip, &seats)?;
        let (voucher_code, discount) = match request.voucher_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                let applied = self.vouchers.validate(code, &trip, quote.base_price).await?;
                self.vouchers.reserve(&applied.code).await?;
                (Some(applied.code), applied.discount)
            }
            _ => (None, 0),
        };

        let booking = Booking {
            booking_code: codes::booking_code(),
            trip_id: trip.id,
            session_id: session_id.to_string(),
            status: BookingStatus::Held,
            seats,
            contact_info,
            base_price: quote.base_price,
            discount,
            final_price: quote.final_price(discount),
            currency: quote.currency,
            voucher_code,
            expires_at: hold.expires_at,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        };

        if let Err(e) = self.bookings.insert_booking(&booking).await {
            self.release_voucher(&booking).await;
            return Err(e.into());
        }

        info!(
            "Booking {} held seats {:?} on trip {} for {} {}",
            booking.booking_code, booking.seats, booking.trip_id, booking.final_price, booking.currency
        );
        self.publish(DomainEvent::BookingCreated(BookingCreatedEvent {
            booking_code: booking.booking_code.clone(),
            trip_id: booking.trip_id,
            seat_numbers: booking.seats.clone(),
            final_price: booking.final_price,
            currency: booking.currency.clone(),
            voucher_code: booking.voucher_code.clone(),
            timestamp: now.timestamp(),
        }))
        .await;
        Ok(booking)
    }

    pub async fn get_booking(&self, booking_code: &str) -> Result<Booking, BookingError> {
        let code = booking_code.trim().to_uppercase();
        self.bookings
            .get_booking(&code)
            .await?
            .ok_or(BookingError::NotFound(code))
    }

    /// Loads a booking the actor is allowed to see.
    pub async fn booking_for(&self, booking_code: &str, actor: &Actor) -> Result<Booking, BookingError> {
        let booking = self.get_booking(booking_code).await?;
        authorize(&booking, actor)?;
        Ok(booking)
    }

    pub async fn payments_for(&self, booking_code: &str) -> Result<Vec<Payment>, BookingError> {
        Ok(self.payments.list_for_booking(booking_code).await?)
    }

    pub async fn bookings_for_trip(&self, trip_id: Uuid) -> Result<Vec<Booking>, BookingError> {
        Ok(self.bookings.list_for_trip(trip_id).await?)
    }

    /// Confirms a held booking: seats go from held to booked, then the
    /// booking moves to CONFIRMED. Confirming twice returns the booking as is.
    pub async fn confirm_booking(&self, booking_code: &str) -> Result<Booking, BookingError> {
        let booking = self.get_booking(booking_code).await?;
        let now = self.clock.now();

        match BookingStateMachine::next(booking.status, BookingEvent::Confirm) {
            Ok(_) => {}
            Err(TransitionError::AlreadyInState(_)) => return Ok(booking),
            Err(_) if booking.status == BookingStatus::Expired => {
                return Err(BookingError::Expired(booking.booking_code))
            }
            Err(e) => return Err(e.into()),
        }

        if booking.is_hold_expired(now) {
            self.expire_booking(&booking).await?;
            return Err(BookingError::Expired(booking.booking_code));
        }

        if booking.final_price > 0 {
            let paid = self
                .payments
                .list_for_booking(&booking.booking_code)
                .await?
                .iter()
                .any(|p| p.status == PaymentStatus::Paid);
            if !paid {
                return Err(BookingError::PaymentRequired(booking.booking_code));
            }
        }

        match self
            .holds
            .commit_seats(booking.trip_id, &booking.session_id, &booking.seats, &booking.booking_code)
            .await
        {
            Ok(()) => {}
            Err(HoldError::HoldLost(lost)) => {
                self.expire_booking(&booking).await?;
                return Err(HoldError::HoldLost(lost).into());
            }
            Err(e) => return Err(e.into()),
        }

        let mut confirmed = booking.clone();
        BookingStateMachine::apply(&mut confirmed, BookingEvent::Confirm, now)?;
        if !self.bookings.update_booking(&confirmed, BookingStatus::Held).await? {
            let current = self.get_booking(&booking.booking_code).await?;
            if current.status == BookingStatus::Confirmed {
                // A concurrent confirm won; the seats are its to keep.
                return Ok(current);
            }
            self.holds
                .free_booked_seats(booking.trip_id, &booking.seats, &booking.booking_code)
                .await?;
            return match current.status {
                BookingStatus::Expired => Err(BookingError::Expired(current.booking_code)),
                _ => Err(BookingError::Conflict(current.booking_code)),
            };
        }

        info!("Booking {} confirmed", confirmed.booking_code);
        self.publish(DomainEvent::BookingConfirmed(BookingConfirmedEvent {
            booking_code: confirmed.booking_code.clone(),
            trip_id: confirmed.trip_id,
            seat_numbers: confirmed.seats.clone(),
            final_price: confirmed.final_price,
            currency: confirmed.currency.clone(),
            timestamp: now.timestamp(),
        }))
        .await;
        Ok(confirmed)
    }

    pub async fn cancel_booking(
        &self,
        booking_code: &str,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Booking, BookingError> {
        let booking = self.booking_for(booking_code, actor).await?;
        let now = self.clock.now();

        match BookingStateMachine::next(booking.status, BookingEvent::Cancel) {
            Ok(_) => {}
            Err(TransitionError::AlreadyInState(_)) => return Ok(booking),
            Err(e) => return Err(e.into()),
        }

        if booking.status == BookingStatus::Confirmed {
            let trip = self.holds.trip(booking.trip_id).await?;
            if now >= trip.sales_close_at(self.holds.policy().cutoff()) {
                return Err(BookingError::CancellationClosed(booking.booking_code));
            }
        }

        let mut cancelled = booking.clone();
        let previous = BookingStateMachine::apply(&mut cancelled, BookingEvent::Cancel, now)?;
        cancelled.cancellation_reason = reason.clone();
        if !self.bookings.update_booking(&cancelled, previous).await? {
            return Err(BookingError::Conflict(booking.booking_code));
        }

        if previous == BookingStatus::Confirmed {
            self.holds
                .free_booked_seats(booking.trip_id, &booking.seats, &booking.booking_code)
                .await?;
        } else {
            self.holds
                .release_with_reason(booking.trip_id, &booking.session_id, Some(booking.seats.as_slice()), ReleaseReason::Cancelled)
                .await?;
        }
        self.release_voucher(&booking).await;
        self.settle_payments(&booking, "booking cancelled").await?;

        info!("Booking {} cancelled by {:?}", cancelled.booking_code, actor);
        self.publish(DomainEvent::BookingCancelled(BookingCancelledEvent {
            booking_code: cancelled.booking_code.clone(),
            trip_id: cancelled.trip_id,
            reason,
            timestamp: now.timestamp(),
        }))
        .await;
        Ok(cancelled)
    }

    /// Expires a held booking whose window closed. Returns `None` when the
    /// booking had already moved on, otherwise the number of payments failed.
    pub async fn expire_booking(&self, booking: &Booking) -> Result<Option<usize>, BookingError> {
        let now = self.clock.now();
        let mut expired = booking.clone();
        if BookingStateMachine::apply(&mut expired, BookingEvent::Expire, now).is_err() {
            return Ok(None);
        }
        if !self.bookings.update_booking(&expired, BookingStatus::Held).await? {
            return Ok(None);
        }

        self.holds
            .release_with_reason(booking.trip_id, &booking.session_id, Some(booking.seats.as_slice()), ReleaseReason::Expired)
            .await?;
        // Seats an interrupted confirm already booked under this code.
        self.holds
            .free_booked_seats(booking.trip_id, &booking.seats, &booking.booking_code)
            .await?;
        self.release_voucher(booking).await;
        let failed = self.settle_payments(booking, "booking expired").await?;

        info!("Booking {} expired", booking.booking_code);
        self.publish(DomainEvent::BookingExpired(BookingExpiredEvent {
            booking_code: booking.booking_code.clone(),
            trip_id: booking.trip_id,
            timestamp: now.timestamp(),
        }))
        .await;
        Ok(Some(failed))
    }

    /// Extends the session's hold and carries the new deadline onto its held bookings.
    pub async fn extend_hold(&self, trip_id: Uuid, session_id: &str) -> Result<HoldSummary, BookingError> {
        let summary = self.holds.extend_hold(trip_id, session_id).await?;
        let now = self.clock.now();
        for booking in self.bookings.list_held_for_session(trip_id, session_id).await? {
            if booking.is_hold_expired(now) {
                continue;
            }
            let mut extended = booking.clone();
            extended.expires_at = summary.expires_at;
            extended.updated_at = now;
            if !self.bookings.update_booking(&extended, BookingStatus::Held).await? {
                warn!("Booking {} changed while extending its hold", booking.booking_code);
            }
        }
        Ok(summary)
    }

    /// Refunds a paid payment through the gateway and marks it REFUNDED.
    pub async fn refund_payment(&self, payment: &Payment, reason: &str) -> Result<Payment, BookingError> {
        let mut refunded = payment.clone();
        refunded.status = PaymentStatus::Refunded;
        refunded.failure_reason = Some(reason.to_string());
        refunded.updated_at = self.clock.now();
        // Claim the refund before calling the gateway so it happens once.
        if !self.payments.update_payment(&refunded, PaymentStatus::Paid).await? {
            return Err(BookingError::Conflict(payment.booking_code.clone()));
        }
        if let Err(e) = self.gateway.refund(payment).await {
            let mut paid = payment.clone();
            paid.status = PaymentStatus::Paid;
            if !self.payments.update_payment(&paid, PaymentStatus::Refunded).await? {
                warn!("Payment {} changed while its refund failed", payment.payment_code);
            }
            return Err(e.into());
        }
        info!("Refunded payment {} for {}", payment.payment_code, payment.booking_code);
        self.publish(DomainEvent::PaymentSettled(PaymentSettledEvent {
            payment_code: refunded.payment_code.clone(),
            booking_code: refunded.booking_code.clone(),
            status: refunded.status.as_str().to_string(),
            amount: refunded.amount,
            currency: refunded.currency.clone(),
            timestamp: refunded.updated_at.timestamp(),
        }))
        .await;
        Ok(refunded)
    }

    /// Fails pending payments and refunds paid ones. Returns how many were failed.
    async fn settle_payments(&self, booking: &Booking, reason: &str) -> Result<usize, BookingError> {
        let now = self.clock.now();
        let mut failed = 0;
        for payment in self.payments.list_for_booking(&booking.booking_code).await? {
            match payment.status {
                PaymentStatus::Pending => {
                    let mut updated = payment.clone();
                    updated.status = PaymentStatus::Failed;
                    updated.failure_reason = Some(reason.to_string());
                    updated.updated_at = now;
                    if self.payments.update_payment(&updated, PaymentStatus::Pending).await? {
                        failed += 1;
                    }
                }
                PaymentStatus::Paid => {
                    if let Err(e) = self.refund_payment(&payment, reason).await {
                        error!("Refund of {} failed: {}", payment.payment_code, e);
                    }
                }
                PaymentStatus::Failed | PaymentStatus::Refunded => {}
            }
        }
        Ok(failed)
    }

    async fn release_voucher(&self, booking: &Booking) {
        if let Some(code) = &booking.voucher_code {
            if let Err(e) = self.vouchers.release(code).await {
                error!("Failed to release voucher {} for {}: {}", code, booking.booking_code, e);
            }
        }
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(&event).await {
            warn!("Failed to publish {}: {}", event.topic(), e);
        }
    }
}

fn authorize(booking: &Booking, actor: &Actor) -> Result<(), BookingError> {
    match actor {
        Actor::Operator(_) => Ok(()),
        Actor::Customer(session) if *session == booking.session_id => Ok(()),
        Actor::Customer(_) => Err(BookingError::NotOwner),
    }
}

fn normalize_seats(seats: &[String]) -> Result<Vec<String>, BookingError> {
    if seats.is_empty() {
        return Err(BookingError::InvalidRequest("no seats selected".to_string()));
    }
    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(seats.len());
    for seat in seats {
        let seat = seat.trim().to_uppercase();
        if !seen.insert(seat.clone()) {
            return Err(BookingError::InvalidRequest(format!("seat {} listed twice", seat)));
        }
        normalized.push(seat);
    }
    normalized.sort();
    Ok(normalized)
}

/// Name must be present, phone 8..=15 digits with an optional leading `+`,
/// email (when given) must contain `@`.
pub fn validate_contact(contact: ContactInfo) -> Result<ContactInfo, BookingError> {
    let full_name = contact.full_name.trim().to_string();
    if full_name.is_empty() {
        return Err(BookingError::InvalidContact("full_name is required".to_string()));
    }

    let phone = contact.phone.expose().trim();
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if !(8..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(BookingError::InvalidContact("phone must be 8 to 15 digits".to_string()));
    }
    let phone = phone.to_string();

    let email = match contact.email {
        Some(email) => {
            let email = email.expose().trim().to_string();
            match email.as_str() {
                "" => None,
                e if e.contains('@') => Some(email),
                _ => return Err(BookingError::InvalidContact("email is not valid".to_string())),
            }
        }
        None => None,
    };

    Ok(ContactInfo {
        full_name,
        phone: phone.into(),
        email: email.map(Into::into),
    })
}

/// Whether `now` is still inside the window in which a booking can be paid.
pub fn is_payable(booking: &Booking, now: DateTime<Utc>) -> bool {
    booking.status == BookingStatus::Held && !booking.is_hold_expired(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{contact, Harness};
    use chrono::Duration;
    use roadly_core::{DiscountRule, PaymentMethod};
    use roadly_shared::Masked;

    fn request(h: &Harness, seats: &[&str]) -> CreateBooking {
        CreateBooking {
            trip_id: h.trip.id,
            seats: seats.iter().map(|s| s.to_string()).collect(),
            contact_info: contact(),
            voucher_code: None,
        }
    }

    #[tokio::test]
    async fn test_create_booking_prices_held_seats() {
        let h = Harness::new().await;
        let hold = h.hold("alice", &["A1", "A2"]).await;

        let booking = h.service.create_booking("alice", request(&h, &["a2", "A1"])).await.unwrap();
        assert!(booking.booking_code.starts_with("BK"));
        assert_eq!(booking.status, BookingStatus::Held);
        assert_eq!(booking.seats, vec!["A1", "A2"]);
        assert_eq!(booking.base_price, 500_000);
        assert_eq!(booking.final_price, 500_000);
        assert_eq!(booking.expires_at, hold.expires_at);
        assert!(h.events.topics().contains(&"booking.created"));
    }

    #[tokio::test]
    async fn test_create_booking_requires_live_hold() {
        let h = Harness::new().await;
        h.hold("alice", &["A1"]).await;

        let err = h.service.create_booking("alice", request(&h, &["A1", "B1"])).await.unwrap_err();
        assert!(matches!(err, BookingError::SeatsNotHeld(ref s) if s == &vec!["B1".to_string()]));

        let err = h.service.create_booking("bob", request(&h, &["A1"])).await.unwrap_err();
        assert!(matches!(err, BookingError::SeatsNotHeld(_)));

        h.clock.advance(Duration::seconds(601));
        assert!(h.service.create_booking("alice", request(&h, &["A1"])).await.is_err());
    }

    #[tokio::test]
    async fn test_seat_cannot_join_two_bookings() {
        let h = Harness::new().await;
        h.hold("alice", &["A1", "A2"]).await;
        let first = h.service.create_booking("alice", request(&h, &["A1"])).await.unwrap();

        let err = h.service.create_booking("alice", request(&h, &["A1", "A2"])).await.unwrap_err();
        assert!(matches!(err, BookingError::SeatsInOtherBooking { ref code, .. } if *code == first.booking_code));
        assert!(h.service.create_booking("alice", request(&h, &["A2"])).await.is_ok());
    }

    #[tokio::test]
    async fn test_contact_validation() {
        let ok = validate_contact(ContactInfo {
            full_name: "  Nguyen Van A ".to_string(),
            phone: Masked::new("+84901234567".to_string()),
            email: Some(Masked::new(String::new())),
        })
        .unwrap();
        assert_eq!(ok.full_name, "Nguyen Van A");
        assert!(ok.email.is_none());

        let short = ContactInfo { phone: Masked::new("12345".to_string()), ..contact() };
        assert!(matches!(validate_contact(short), Err(BookingError::InvalidContact(_))));
        let letters = ContactInfo { phone: Masked::new("09012345ab".to_string()), ..contact() };
        assert!(validate_contact(letters).is_err());
        let email = ContactInfo { email: Some(Masked::new("nobody".to_string())), ..contact() };
        assert!(validate_contact(email).is_err());
        let name = ContactInfo { full_name: " ".to_string(), ..contact() };
        assert!(validate_contact(name).is_err());
    }

    #[tokio::test]
    async fn test_voucher_is_applied_and_reserved() {
        let h = Harness::new().await;
        h.voucher("HALF", DiscountRule::Percentage { percent: 50, max_discount: None }, Some(1)).await;
        h.hold("alice", &["A1"]).await;
        h.hold("bob", &["B1"]).await;

        let mut req = request(&h, &["A1"]);
        req.voucher_code = Some("half".to_string());
        let booking = h.service.create_booking("alice", req).await.unwrap();
        assert_eq!(booking.voucher_code.as_deref(), Some("HALF"));
        assert_eq!(booking.discount, 125_000);
        assert_eq!(booking.final_price, 125_000);

        let mut req = request(&h, &["B1"]);
        req.voucher_code = Some("HALF".to_string());
        assert!(matches!(
            h.service.create_booking("bob", req).await,
            Err(BookingError::Voucher(_))
        ));

        // Cancelling gives the use back
        h.service.cancel_booking(&booking.booking_code, &Actor::Customer("alice".to_string()), None).await.unwrap();
        let mut req = request(&h, &["B1"]);
        req.voucher_code = Some("HALF".to_string());
        assert!(h.service.create_booking("bob", req).await.is_ok());
    }

    #[tokio::test]
    async fn test_confirm_requires_payment() {
        let h = Harness::new().await;
        h.hold("alice", &["A1"]).await;
        let booking = h.service.create_booking("alice", request(&h, &["A1"])).await.unwrap();

        assert!(matches!(
            h.service.confirm_booking(&booking.booking_code).await,
            Err(BookingError::PaymentRequired(_))
        ));

        h.paid_payment(&booking).await;
        let confirmed = h.service.confirm_booking(&booking.booking_code).await.unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert!(confirmed.confirmed_at.is_some());

        // Idempotent
        let again = h.service.confirm_booking(&booking.booking_code).await.unwrap();
        assert_eq!(again.status, BookingStatus::Confirmed);

        let map = h.holds.seat_map(h.trip.id, None).await.unwrap();
        assert_eq!(map.occupancy.booked, 1);
        assert_eq!(map.occupancy.held, 0);
    }

    #[tokio::test]
    async fn test_confirm_retry_after_seats_were_committed() {
        let h = Harness::new().await;
        h.hold("alice", &["A1"]).await;
        let booking = h.service.create_booking("alice", request(&h, &["A1"])).await.unwrap();
        h.paid_payment(&booking).await;

        // First attempt got as far as booking the seats
        h.holds
            .commit_seats(h.trip.id, "alice", &booking.seats, &booking.booking_code)
            .await
            .unwrap();

        let confirmed = h.service.confirm_booking(&booking.booking_code).await.unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert!(h.gateway.refunds().is_empty());
        let payments = h.service.payments_for(&booking.booking_code).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Paid);
        let map = h.holds.seat_map(h.trip.id, None).await.unwrap();
        assert_eq!(map.occupancy.booked, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirms_settle_once() {
        for _ in 0..20 {
            let h = Harness::new().await;
            h.hold("alice", &["A1", "A2"]).await;
            let booking = h.service.create_booking("alice", request(&h, &["A1", "A2"])).await.unwrap();
            h.paid_payment(&booking).await;

            let (a, b) = (h.service.clone(), h.service.clone());
            let (code_a, code_b) = (booking.booking_code.clone(), booking.booking_code.clone());
            let first = tokio::spawn(async move { a.confirm_booking(&code_a).await });
            let second = tokio::spawn(async move { b.confirm_booking(&code_b).await });

            for result in [first.await.unwrap(), second.await.unwrap()] {
                assert_eq!(result.unwrap().status, BookingStatus::Confirmed);
            }
            let confirmed_events = h.events.topics().into_iter().filter(|t| *t == "booking.confirmed").count();
            assert_eq!(confirmed_events, 1);
            assert!(h.gateway.refunds().is_empty());

            let stored = h.service.get_booking(&booking.booking_code).await.unwrap();
            assert_eq!(stored.status, BookingStatus::Confirmed);
            let map = h.holds.seat_map(h.trip.id, None).await.unwrap();
            assert_eq!(map.occupancy.booked, 2);
            assert_eq!(map.occupancy.held, 0);
        }
    }

    #[tokio::test]
    async fn test_expiring_interrupted_confirm_frees_booked_seats() {
        let h = Harness::new().await;
        h.hold("alice", &["A1"]).await;
        let booking = h.service.create_booking("alice", request(&h, &["A1"])).await.unwrap();
        h.holds
            .commit_seats(h.trip.id, "alice", &booking.seats, &booking.booking_code)
            .await
            .unwrap();

        h.clock.advance(Duration::seconds(601));
        assert_eq!(h.service.expire_booking(&booking).await.unwrap(), Some(0));

        let map = h.holds.seat_map(h.trip.id, None).await.unwrap();
        assert_eq!(map.occupancy.booked, 0);
        assert_eq!(map.occupancy.held, 0);
        h.hold("bob", &["A1"]).await;
    }

    #[tokio::test]
    async fn test_free_booking_confirms_without_payment() {
        let h = Harness::new().await;
        h.voucher("FREE", DiscountRule::Percentage { percent: 100, max_discount: None }, None).await;
        h.hold("alice", &["A1"]).await;
        let mut req = request(&h, &["A1"]);
        req.voucher_code = Some("FREE".to_string());
        let booking = h.service.create_booking("alice", req).await.unwrap();
        assert_eq!(booking.final_price, 0);

        let confirmed = h.service.confirm_booking(&booking.booking_code).await.unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_confirm_after_window_expires_booking() {
        let h = Harness::new().await;
        h.hold("alice", &["A1"]).await;
        let booking = h.service.create_booking("alice", request(&h, &["A1"])).await.unwrap();
        h.paid_payment(&booking).await;
        h.clock.advance(Duration::seconds(601));

        assert!(matches!(
            h.service.confirm_booking(&booking.booking_code).await,
            Err(BookingError::Expired(_))
        ));
        let stored = h.service.get_booking(&booking.booking_code).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Expired);
    }

    #[tokio::test]
    async fn test_confirm_with_released_seats_is_hold_lost() {
        let h = Harness::new().await;
        h.hold("alice", &["A1"]).await;
        let booking = h.service.create_booking("alice", request(&h, &["A1"])).await.unwrap();
        h.paid_payment(&booking).await;
        h.holds.release_seats(h.trip.id, "alice", None).await.unwrap();

        assert!(matches!(
            h.service.confirm_booking(&booking.booking_code).await,
            Err(BookingError::Hold(HoldError::HoldLost(_)))
        ));
        let stored = h.service.get_booking(&booking.booking_code).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Expired);
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let h = Harness::new().await;
        h.hold("alice", &["A1"]).await;
        let booking = h.service.create_booking("alice", request(&h, &["A1"])).await.unwrap();
        let code = booking.booking_code.clone();

        assert!(matches!(
            h.service.cancel_booking(&code, &Actor::Customer("mallory".to_string()), None).await,
            Err(BookingError::NotOwner)
        ));

        let cancelled = h
            .service
            .cancel_booking(&code, &Actor::Customer("alice".to_string()), Some("changed plans".to_string()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("changed plans"));
        assert!(h.holds.session_hold(h.trip.id, "alice").await.unwrap().is_none());

        assert!(matches!(
            h.service.confirm_booking(&code).await,
            Err(BookingError::Transition(TransitionError::InvalidTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn test_cancel_confirmed_refunds_before_cutoff() {
        let h = Harness::new().await;
        h.hold("alice", &["A1"]).await;
        let booking = h.service.create_booking("alice", request(&h, &["A1"])).await.unwrap();
        let payment = h.paid_payment(&booking).await;
        h.service.confirm_booking(&booking.booking_code).await.unwrap();

        let operator = Actor::Operator("ops".to_string());
        h.service.cancel_booking(&booking.booking_code, &operator, None).await.unwrap();
        assert_eq!(h.gateway.refunds(), vec![payment.payment_code.clone()]);
        let payments = h.service.payments_for(&booking.booking_code).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Refunded);
        assert!(h.holds.hold_seats(h.trip.id, "bob", &["A1".to_string()]).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_confirmed_after_cutoff_is_refused() {
        let h = Harness::new().await;
        h.hold("alice", &["A1"]).await;
        let booking = h.service.create_booking("alice", request(&h, &["A1"])).await.unwrap();
        h.paid_payment(&booking).await;
        h.service.confirm_booking(&booking.booking_code).await.unwrap();

        h.clock.set(h.trip.departure_at - Duration::minutes(10));
        assert!(matches!(
            h.service.cancel_booking(&booking.booking_code, &Actor::Customer("alice".to_string()), None).await,
            Err(BookingError::CancellationClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_extend_hold_moves_booking_deadline() {
        let h = Harness::new().await;
        h.hold("alice", &["A1"]).await;
        let booking = h.service.create_booking("alice", request(&h, &["A1"])).await.unwrap();

        let summary = h.service.extend_hold(h.trip.id, "alice").await.unwrap();
        assert_eq!(summary.expires_at, booking.expires_at + Duration::seconds(300));
        let stored = h.service.get_booking(&booking.booking_code).await.unwrap();
        assert_eq!(stored.expires_at, summary.expires_at);
    }

    #[tokio::test]
    async fn test_expire_fails_pending_payments() {
        let h = Harness::new().await;
        h.hold("alice", &["A1"]).await;
        let booking = h.service.create_booking("alice", request(&h, &["A1"])).await.unwrap();
        h.pending_payment(&booking, PaymentMethod::Card).await;

        assert_eq!(h.service.expire_booking(&booking).await.unwrap(), Some(1));
        assert_eq!(h.service.expire_booking(&booking).await.unwrap(), None);
        let payments = h.service.payments_for(&booking.booking_code).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Failed);
        assert_eq!(payments[0].failure_reason.as_deref(), Some("booking expired"));
        assert!(h.events.topics().contains(&"booking.expired"));
    }

    #[tokio::test]
    async fn test_operator_lists_trip_bookings() {
        let h = Harness::new().await;
        h.hold("alice", &["A1"]).await;
        h.hold("bob", &["B1"]).await;
        h.service.create_booking("alice", request(&h, &["A1"])).await.unwrap();
        h.service.create_booking("bob", request(&h, &["B1"])).await.unwrap();
        assert_eq!(h.service.bookings_for_trip(h.trip.id).await.unwrap().len(), 2);
        assert!(is_payable(&h.service.bookings_for_trip(h.trip.id).await.unwrap()[0], h.clock.now()));
    }
}

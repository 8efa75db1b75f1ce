use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use roadly_core::codes;
use roadly_core::gateway::PaymentGateway;
use roadly_core::repository::{EventPublisher, PaymentRepository};
use roadly_core::{BookingStatus, Clock, Payment, PaymentMethod, PaymentStatus};
use roadly_shared::models::events::PaymentSettledEvent;
use roadly_shared::DomainEvent;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{BookingError, PaymentError};
use crate::service::{is_payable, Actor, BookingService};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Paid,
    Failed,
}

/// Body the payment gateway posts to the webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCallback {
    pub event_id: String,
    pub payment_code: String,
    pub status: CallbackStatus,
    #[serde(default)]
    pub gateway_reference: Option<String>,
    pub amount: i64,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackOutcome {
    /// Payment captured and the booking confirmed.
    Confirmed,
    /// Payment captured but the booking could not be confirmed; money returned.
    Refunded,
    Failed,
    /// Already processed, or stale.
    Duplicate,
}

impl CallbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::Confirmed => "confirmed",
            CallbackOutcome::Refunded => "refunded",
            CallbackOutcome::Failed => "failed",
            CallbackOutcome::Duplicate => "duplicate",
        }
    }
}

/// `base64url(HMAC-SHA256(secret, body))` without padding.
pub fn sign_payload(secret: &[u8], body: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(body);
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> Result<(), PaymentError> {
    let expected = URL_SAFE_NO_PAD
        .decode(signature.trim())
        .map_err(|_| PaymentError::InvalidSignature)?;
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| PaymentError::InvalidSignature)?;
    mac.update(body);
    // verify_slice compares in constant time
    mac.verify_slice(&expected).map_err(|_| PaymentError::InvalidSignature)
}

/// Matches gateway callbacks to payments and drives the booking from there.
pub struct PaymentReconciler {
    payments: Arc<dyn PaymentRepository>,
    bookings: Arc<BookingService>,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    webhook_secret: Vec<u8>,
}

impl PaymentReconciler {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        bookings: Arc<BookingService>,
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        webhook_secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            payments,
            bookings,
            gateway,
            events,
            clock,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Starts a payment for a held booking. A pending payment that already
    /// exists is returned instead of opening a second checkout.
    pub async fn create_payment(
        &self,
        session_id: &str,
        booking_code: &str,
        method: PaymentMethod,
    ) -> Result<Payment, PaymentError> {
        let booking = self
            .bookings
            .booking_for(booking_code, &Actor::Customer(session_id.to_string()))
            .await?;
        let now = self.clock.now();

        if booking.status != BookingStatus::Held {
            return Err(PaymentError::NotPayable {
                code: booking.booking_code,
                reason: format!("booking is {}", booking.status),
            });
        }
        if !is_payable(&booking, now) {
            return Err(BookingError::Expired(booking.booking_code).into());
        }
        if booking.final_price <= 0 {
            return Err(PaymentError::NotPayable {
                code: booking.booking_code,
                reason: "nothing to pay".to_string(),
            });
        }

        let existing = self.payments.list_for_booking(&booking.booking_code).await?;
        if let Some(pending) = existing.into_iter().find(|p| p.status == PaymentStatus::Pending) {
            return Ok(pending);
        }

        let mut payment = Payment {
            payment_code: codes::payment_code(),
            booking_code: booking.booking_code.clone(),
            method,
            amount: booking.final_price,
            currency: booking.currency.clone(),
            status: PaymentStatus::Pending,
            gateway_reference: None,
            checkout_url: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        let checkout = self.gateway.create_checkout(&payment).await?;
        payment.gateway_reference = Some(checkout.reference);
        payment.checkout_url = checkout.checkout_url;
        self.payments.insert_payment(&payment).await?;

        info!(
            "Payment {} opened for booking {} ({} {})",
            payment.payment_code, payment.booking_code, payment.amount, payment.currency
        );
        Ok(payment)
    }

    pub async fn handle_callback(&self, body: &[u8], signature: &str) -> Result<CallbackOutcome, PaymentError> {
        if let Err(e) = verify_signature(&self.webhook_secret, body, signature) {
            warn!("Rejected payment callback with a bad signature");
            return Err(e);
        }
        let callback: PaymentCallback =
            serde_json::from_slice(body).map_err(|e| PaymentError::MalformedCallback(e.to_string()))?;
        if self.payments.callback_seen(&callback.event_id).await? {
            debug!("Callback {} was delivered before", callback.event_id);
            return Ok(CallbackOutcome::Duplicate);
        }

        let payment = self
            .payments
            .get_payment(&callback.payment_code)
            .await?
            .ok_or_else(|| PaymentError::NotFound(callback.payment_code.clone()))?;

        if callback.amount != payment.amount {
            warn!(
                "Callback {} for {} carries amount {}, expected {}",
                callback.event_id, payment.payment_code, callback.amount, payment.amount
            );
            return Err(PaymentError::AmountMismatch {
                expected: payment.amount,
                received: callback.amount,
            });
        }

        let outcome = match callback.status {
            CallbackStatus::Paid => self.settle_paid(payment, &callback).await?,
            CallbackStatus::Failed => self.settle_failed(payment, &callback).await?,
        };

        if !self.payments.record_callback(&callback.event_id, self.clock.now()).await? {
            debug!("Callback {} was recorded by a concurrent delivery", callback.event_id);
        }
        info!("Callback {} for {} -> {:?}", callback.event_id, callback.payment_code, outcome);
        Ok(outcome)
    }

    async fn settle_paid(&self, payment: Payment, callback: &PaymentCallback) -> Result<CallbackOutcome, PaymentError> {
        let replay = payment.status == PaymentStatus::Paid;
        let paid = match payment.status {
            PaymentStatus::Pending | PaymentStatus::Failed => {
                let mut paid = payment.clone();
                paid.status = PaymentStatus::Paid;
                paid.failure_reason = None;
                if callback.gateway_reference.is_some() {
                    paid.gateway_reference = callback.gateway_reference.clone();
                }
                paid.updated_at = self.clock.now();
                if !self.payments.update_payment(&paid, payment.status).await? {
                    return Ok(CallbackOutcome::Duplicate);
                }
                self.publish_settled(&paid).await;
                paid
            }
            // A replay after a crash between capture and confirmation still
            // needs the booking confirmed or the money returned.
            PaymentStatus::Paid => payment,
            PaymentStatus::Refunded => return Ok(CallbackOutcome::Duplicate),
        };

        let booking = self.bookings.get_booking(&paid.booking_code).await?;
        match booking.status {
            BookingStatus::Held => {}
            BookingStatus::Confirmed if self.is_kept_payment(&paid).await? => {
                return Ok(if replay { CallbackOutcome::Duplicate } else { CallbackOutcome::Confirmed });
            }
            BookingStatus::Confirmed => return self.refund_capture(&paid, "booking already paid").await,
            status => return self.refund_capture(&paid, &format!("booking is {}", status)).await,
        }

        match self.bookings.confirm_booking(&paid.booking_code).await {
            Ok(_) if self.is_kept_payment(&paid).await? => Ok(CallbackOutcome::Confirmed),
            Ok(_) => self.refund_capture(&paid, "booking already paid").await,
            Err(BookingError::Core(e)) => Err(PaymentError::Core(e)),
            Err(e) => {
                warn!("Booking {} not confirmable after payment {}: {}", paid.booking_code, paid.payment_code, e);
                // Expiring the booking may already have refunded it.
                let current = self
                    .payments
                    .get_payment(&paid.payment_code)
                    .await?
                    .unwrap_or(paid);
                if current.status == PaymentStatus::Paid {
                    return self.refund_capture(&current, &e.to_string()).await;
                }
                Ok(CallbackOutcome::Refunded)
            }
        }
    }

    /// The first payment captured for a booking is the one it keeps.
    async fn is_kept_payment(&self, payment: &Payment) -> Result<bool, PaymentError> {
        let first = self
            .payments
            .list_for_booking(&payment.booking_code)
            .await?
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Paid)
            .min_by(|a, b| (a.updated_at, &a.payment_code).cmp(&(b.updated_at, &b.payment_code)));
        Ok(first.map_or(true, |p| p.payment_code == payment.payment_code))
    }

    async fn refund_capture(&self, payment: &Payment, reason: &str) -> Result<CallbackOutcome, PaymentError> {
        warn!("Refunding payment {} for {}: {}", payment.payment_code, payment.booking_code, reason);
        match self.bookings.refund_payment(payment, reason).await {
            // Conflict: someone else refunded it first.
            Ok(_) | Err(BookingError::Conflict(_)) => Ok(CallbackOutcome::Refunded),
            Err(BookingError::Core(e)) => Err(PaymentError::Core(e)),
            Err(e) => Err(e.into()),
        }
    }

    async fn settle_failed(&self, payment: Payment, callback: &PaymentCallback) -> Result<CallbackOutcome, PaymentError> {
        if payment.status != PaymentStatus::Pending {
            return Ok(CallbackOutcome::Duplicate);
        }
        let mut failed = payment.clone();
        failed.status = PaymentStatus::Failed;
        failed.failure_reason = Some(
            callback
                .failure_reason
                .clone()
                .unwrap_or_else(|| "declined by gateway".to_string()),
        );
        failed.updated_at = self.clock.now();
        if !self.payments.update_payment(&failed, PaymentStatus::Pending).await? {
            return Ok(CallbackOutcome::Duplicate);
        }
        self.publish_settled(&failed).await;
        Ok(CallbackOutcome::Failed)
    }

    async fn publish_settled(&self, payment: &Payment) {
        let event = DomainEvent::PaymentSettled(PaymentSettledEvent {
            payment_code: payment.payment_code.clone(),
            booking_code: payment.booking_code.clone(),
            status: payment.status.as_str().to_string(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            timestamp: self.clock.now().timestamp(),
        });
        if let Err(e) = self.events.publish(&event).await {
            warn!("Failed to publish {}: {}", event.topic(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use chrono::Duration;
    use roadly_core::{Booking, CoreError};

    const SECRET: &[u8] = b"whsec_test";

    fn callback_body(event_id: &str, payment: &Payment, status: &str, amount: i64) -> Vec<u8> {
        serde_json::json!({
            "event_id": event_id,
            "payment_code": payment.payment_code,
            "status": status,
            "gateway_reference": "gw_123",
            "amount": amount,
        })
        .to_string()
        .into_bytes()
    }

    async fn send(r: &PaymentReconciler, body: &[u8]) -> Result<CallbackOutcome, PaymentError> {
        r.handle_callback(body, &sign_payload(SECRET, body).unwrap()).await
    }

    async fn booked(h: &Harness) -> (PaymentReconciler, Booking, Payment) {
        let r = h.reconciler(SECRET);
        h.hold("alice", &["A1"]).await;
        let booking = h.create_booking("alice", &["A1"]).await;
        let payment = r.create_payment("alice", &booking.booking_code, PaymentMethod::Card).await.unwrap();
        (r, booking, payment)
    }

    #[test]
    fn test_signature_round_trip() {
        let sig = sign_payload(SECRET, b"{}").unwrap();
        assert!(verify_signature(SECRET, b"{}", &sig).is_ok());
        assert!(verify_signature(SECRET, b"{ }", &sig).is_err());
        assert!(verify_signature(b"other", b"{}", &sig).is_err());
        assert!(verify_signature(SECRET, b"{}", "not base64!").is_err());
    }

    #[tokio::test]
    async fn test_create_payment_is_idempotent() {
        let h = Harness::new().await;
        let (r, booking, payment) = booked(&h).await;
        assert!(payment.payment_code.starts_with("PAY"));
        assert_eq!(payment.amount, booking.final_price);
        assert!(payment.checkout_url.as_deref().unwrap().ends_with(&payment.payment_code));

        let again = r.create_payment("alice", &booking.booking_code, PaymentMethod::EWallet).await.unwrap();
        assert_eq!(again.payment_code, payment.payment_code);
        assert!(matches!(
            r.create_payment("bob", &booking.booking_code, PaymentMethod::Card).await,
            Err(PaymentError::Booking(BookingError::NotOwner))
        ));
    }

    #[tokio::test]
    async fn test_paid_callback_confirms_booking() {
        let h = Harness::new().await;
        let (r, booking, payment) = booked(&h).await;

        let body = callback_body("evt_1", &payment, "paid", payment.amount);
        assert_eq!(send(&r, &body).await.unwrap(), CallbackOutcome::Confirmed);
        assert_eq!(send(&r, &body).await.unwrap(), CallbackOutcome::Duplicate);

        let stored = h.service.get_booking(&booking.booking_code).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        let payments = h.service.payments_for(&booking.booking_code).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Paid);
        assert_eq!(payments[0].gateway_reference.as_deref(), Some("gw_123"));
        assert!(h.events.topics().contains(&"payment.settled"));
    }

    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let h = Harness::new().await;
        let (r, booking, payment) = booked(&h).await;
        let body = callback_body("evt_1", &payment, "paid", payment.amount);

        assert!(matches!(
            r.handle_callback(&body, &sign_payload(b"wrong", &body).unwrap()).await,
            Err(PaymentError::InvalidSignature)
        ));
        let stored = h.service.get_booking(&booking.booking_code).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Held);
    }

    #[tokio::test]
    async fn test_amount_mismatch_is_rejected() {
        let h = Harness::new().await;
        let (r, _, payment) = booked(&h).await;
        let body = callback_body("evt_1", &payment, "paid", payment.amount - 1);
        assert!(matches!(send(&r, &body).await, Err(PaymentError::AmountMismatch { .. })));
        let payments = h.service.payments_for(&payment.booking_code).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_failed_callback_keeps_booking_held() {
        let h = Harness::new().await;
        let (r, booking, payment) = booked(&h).await;

        let body = callback_body("evt_1", &payment, "failed", payment.amount);
        assert_eq!(send(&r, &body).await.unwrap(), CallbackOutcome::Failed);
        let stored = h.service.get_booking(&booking.booking_code).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Held);

        // The customer can retry with a fresh payment
        let retry = r.create_payment("alice", &booking.booking_code, PaymentMethod::Card).await.unwrap();
        assert_ne!(retry.payment_code, payment.payment_code);
    }

    #[tokio::test]
    async fn test_late_payment_is_refunded() {
        let h = Harness::new().await;
        let (r, booking, payment) = booked(&h).await;
        h.clock.advance(Duration::seconds(601));

        let body = callback_body("evt_1", &payment, "paid", payment.amount);
        assert_eq!(send(&r, &body).await.unwrap(), CallbackOutcome::Refunded);
        assert_eq!(h.gateway.refunds(), vec![payment.payment_code.clone()]);

        let stored = h.service.get_booking(&booking.booking_code).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Expired);
        let payments = h.service.payments_for(&booking.booking_code).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_capture_after_booking_is_paid_is_refunded() {
        let h = Harness::new().await;
        let (r, booking, first) = booked(&h).await;

        let declined = callback_body("evt_1", &first, "failed", first.amount);
        assert_eq!(send(&r, &declined).await.unwrap(), CallbackOutcome::Failed);
        let second = r.create_payment("alice", &booking.booking_code, PaymentMethod::Card).await.unwrap();
        let body = callback_body("evt_2", &second, "paid", second.amount);
        assert_eq!(send(&r, &body).await.unwrap(), CallbackOutcome::Confirmed);

        // The gateway captures the declined payment after all
        h.clock.advance(Duration::seconds(5));
        let late = callback_body("evt_3", &first, "paid", first.amount);
        assert_eq!(send(&r, &late).await.unwrap(), CallbackOutcome::Refunded);
        assert_eq!(h.gateway.refunds(), vec![first.payment_code.clone()]);

        let payments = h.service.payments_for(&booking.booking_code).await.unwrap();
        let status_of = |code: &str| payments.iter().find(|p| p.payment_code == code).map(|p| p.status);
        assert_eq!(status_of(&first.payment_code), Some(PaymentStatus::Refunded));
        assert_eq!(status_of(&second.payment_code), Some(PaymentStatus::Paid));
        let stored = h.service.get_booking(&booking.booking_code).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_seen_event_id_is_duplicate() {
        let h = Harness::new().await;
        let (r, booking, first) = booked(&h).await;

        let declined = callback_body("evt_1", &first, "failed", first.amount);
        assert_eq!(send(&r, &declined).await.unwrap(), CallbackOutcome::Failed);

        // Same event id, now pointing at a fresh pending payment
        let second = r.create_payment("alice", &booking.booking_code, PaymentMethod::Card).await.unwrap();
        let reused = callback_body("evt_1", &second, "paid", second.amount);
        assert_eq!(send(&r, &reused).await.unwrap(), CallbackOutcome::Duplicate);

        let payments = h.service.payments_for(&booking.booking_code).await.unwrap();
        assert!(payments.iter().any(|p| p.payment_code == second.payment_code && p.status == PaymentStatus::Pending));
        let stored = h.service.get_booking(&booking.booking_code).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Held);
    }

    #[tokio::test]
    async fn test_refund_is_retried_after_gateway_outage() {
        let h = Harness::new().await;
        let (r, booking, payment) = booked(&h).await;
        h.clock.advance(Duration::seconds(601));
        h.gateway.set_unavailable(true);

        let body = callback_body("evt_1", &payment, "paid", payment.amount);
        assert!(matches!(send(&r, &body).await, Err(PaymentError::Core(CoreError::GatewayError(_)))));
        let payments = h.service.payments_for(&booking.booking_code).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Paid);

        // The gateway retries the same event once it is back
        h.gateway.set_unavailable(false);
        assert_eq!(send(&r, &body).await.unwrap(), CallbackOutcome::Refunded);
        assert_eq!(h.gateway.refunds(), vec![payment.payment_code.clone()]);
        assert_eq!(send(&r, &body).await.unwrap(), CallbackOutcome::Duplicate);

        let stored = h.service.get_booking(&booking.booking_code).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Expired);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_callback_racing_customer_confirm() {
        for _ in 0..20 {
            let h = Harness::new().await;
            let (r, booking, payment) = booked(&h).await;
            let r = Arc::new(r);

            let body = callback_body("evt_1", &payment, "paid", payment.amount);
            let webhook = {
                let r = r.clone();
                tokio::spawn(async move { send(&r, &body).await })
            };
            let customer = {
                let service = h.service.clone();
                let code = booking.booking_code.clone();
                tokio::spawn(async move { service.confirm_booking(&code).await })
            };

            assert_eq!(webhook.await.unwrap().unwrap(), CallbackOutcome::Confirmed);
            match customer.await.unwrap() {
                Ok(b) => assert_eq!(b.status, BookingStatus::Confirmed),
                Err(e) => assert!(matches!(e, BookingError::PaymentRequired(_)), "{}", e),
            }
            assert!(h.gateway.refunds().is_empty());
            let stored = h.service.get_booking(&booking.booking_code).await.unwrap();
            assert_eq!(stored.status, BookingStatus::Confirmed);
            let map = h.holds.seat_map(h.trip.id, None).await.unwrap();
            assert_eq!(map.occupancy.booked, 1);
        }
    }

    #[tokio::test]
    async fn test_unknown_payment_and_bad_body() {
        let h = Harness::new().await;
        let r = h.reconciler(SECRET);
        let body = br#"{"event_id":"e","payment_code":"PAYNOPE","status":"paid","amount":1}"#;
        assert!(matches!(send(&r, body).await, Err(PaymentError::NotFound(_))));
        assert!(matches!(send(&r, b"not json").await, Err(PaymentError::MalformedCallback(_))));
    }

    #[tokio::test]
    async fn test_expired_booking_cannot_be_paid() {
        let h = Harness::new().await;
        let r = h.reconciler(SECRET);
        h.hold("alice", &["A1"]).await;
        let booking = h.create_booking("alice", &["A1"]).await;
        h.clock.advance(Duration::seconds(601));
        assert!(matches!(
            r.create_payment("alice", &booking.booking_code, PaymentMethod::Card).await,
            Err(PaymentError::Booking(BookingError::Expired(_)))
        ));
    }
}

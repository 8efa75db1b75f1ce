//! Fixtures shared by the unit tests of this crate.

use chrono::{Duration, Utc};
use roadly_catalog::FareCalculator;
use roadly_core::repository::{PaymentRepository, TripRepository};
use roadly_core::{
    Booking, BookingStatus, Clock, ContactInfo, DiscountRule, ManualClock, Payment, PaymentMethod,
    PaymentStatus, SeatLayout, Trip, TripStatus,
};
use roadly_hold::{HoldPolicy, HoldSummary, SeatLockManager};
use roadly_shared::Masked;
use roadly_store::{
    MemoryBookingRepository, MemoryEventLog, MemoryPaymentRepository, MemorySeatLockStore,
    MemoryTripRepository, MemoryVoucherRepository,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::gateway::MockPaymentGateway;
use crate::reaper::HoldExpiryReaper;
use crate::reconciler::PaymentReconciler;
use crate::service::{BookingService, CreateBooking};
use crate::voucher::{NewVoucher, VoucherValidator};

pub fn trip() -> Trip {
    Trip {
        id: Uuid::new_v4(),
        route_code: "SGN-DLT".to_string(),
        origin: "Sai Gon".to_string(),
        destination: "Da Lat".to_string(),
        departure_at: Utc::now() + Duration::hours(6),
        fare: 250_000,
        currency: "VND".to_string(),
        status: TripStatus::Scheduled,
        seat_layout: SeatLayout::grid(1, 4, 2),
        created_at: Utc::now(),
    }
}

pub fn contact() -> ContactInfo {
    ContactInfo {
        full_name: "Tran Thi B".to_string(),
        phone: Masked::new("0901234567".to_string()),
        email: Some(Masked::new("b@example.com".to_string())),
    }
}

pub fn booking() -> Booking {
    let now = Utc::now();
    Booking {
        booking_code: "BK23456789".to_string(),
        trip_id: Uuid::new_v4(),
        session_id: "alice".to_string(),
        status: BookingStatus::Held,
        seats: vec!["A1".to_string()],
        contact_info: contact(),
        base_price: 250_000,
        discount: 0,
        final_price: 250_000,
        currency: "VND".to_string(),
        voucher_code: None,
        expires_at: now + Duration::minutes(10),
        created_at: now,
        updated_at: now,
        confirmed_at: None,
        cancelled_at: None,
        cancellation_reason: None,
    }
}

/// Every component wired over in-memory stores and a manual clock.
pub struct Harness {
    pub trip: Trip,
    pub clock: Arc<ManualClock>,
    pub events: Arc<MemoryEventLog>,
    pub gateway: Arc<MockPaymentGateway>,
    pub bookings: Arc<MemoryBookingRepository>,
    pub payments: Arc<MemoryPaymentRepository>,
    pub holds: Arc<SeatLockManager>,
    pub vouchers: Arc<VoucherValidator>,
    pub service: Arc<BookingService>,
}

impl Harness {
    pub async fn new() -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let events = Arc::new(MemoryEventLog::new());
        let gateway = Arc::new(MockPaymentGateway::new("https://pay.test/checkout"));
        let trips = Arc::new(MemoryTripRepository::new());
        let bookings = Arc::new(MemoryBookingRepository::new());
        let payments = Arc::new(MemoryPaymentRepository::new());

        let trip = trip();
        trips.save_trip(&trip).await.unwrap();

        let holds = Arc::new(SeatLockManager::new(
            trips,
            Arc::new(MemorySeatLockStore::new()),
            events.clone(),
            clock.clone(),
            HoldPolicy::default(),
        ));
        let vouchers = Arc::new(VoucherValidator::new(Arc::new(MemoryVoucherRepository::new()), clock.clone()));
        let service = Arc::new(BookingService::new(
            bookings.clone(),
            payments.clone(),
            holds.clone(),
            vouchers.clone(),
            FareCalculator::new(),
            gateway.clone(),
            events.clone(),
            clock.clone(),
        ));

        Self { trip, clock, events, gateway, bookings, payments, holds, vouchers, service }
    }

    pub async fn hold(&self, session: &str, seats: &[&str]) -> HoldSummary {
        let seats: Vec<String> = seats.iter().map(|s| s.to_string()).collect();
        self.holds.hold_seats(self.trip.id, session, &seats).await.unwrap()
    }

    pub async fn create_booking(&self, session: &str, seats: &[&str]) -> Booking {
        let request = CreateBooking {
            trip_id: self.trip.id,
            seats: seats.iter().map(|s| s.to_string()).collect(),
            contact_info: contact(),
            voucher_code: None,
        };
        self.service.create_booking(session, request).await.unwrap()
    }

    pub async fn voucher(&self, code: &str, discount: DiscountRule, max_uses: Option<u32>) {
        self.vouchers
            .create(NewVoucher {
                code: code.to_string(),
                description: String::new(),
                discount,
                valid_from: self.clock.now() - Duration::days(1),
                valid_until: self.clock.now() + Duration::days(30),
                max_uses,
                min_order_amount: 0,
                route_codes: vec![],
            })
            .await
            .unwrap();
    }

    pub async fn pending_payment(&self, booking: &Booking, method: PaymentMethod) -> Payment {
        let now = self.clock.now();
        let payment = Payment {
            payment_code: roadly_core::codes::payment_code(),
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
        self.payments.insert_payment(&payment).await.unwrap();
        payment
    }

    pub async fn paid_payment(&self, booking: &Booking) -> Payment {
        let mut payment = self.pending_payment(booking, PaymentMethod::Card).await;
        payment.status = PaymentStatus::Paid;
        assert!(self.payments.update_payment(&payment, PaymentStatus::Pending).await.unwrap());
        payment
    }

    pub fn reconciler(&self, secret: &[u8]) -> PaymentReconciler {
        PaymentReconciler::new(
            self.payments.clone(),
            self.service.clone(),
            self.gateway.clone(),
            self.events.clone(),
            self.clock.clone(),
            secret.to_vec(),
        )
    }

    pub fn reaper(&self) -> HoldExpiryReaper {
        HoldExpiryReaper::new(self.bookings.clone(), self.service.clone(), self.clock.clone(), 50)
    }
}

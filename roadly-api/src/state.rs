use roadly_booking::{BookingService, HoldExpiryReaper, MockPaymentGateway, PaymentReconciler, VoucherValidator};
use roadly_catalog::{FareCalculator, TripCatalog};
use roadly_core::gateway::PaymentGateway;
use roadly_core::repository::{
    BookingRepository, EventPublisher, PaymentRepository, SeatLockStore, TripRepository,
    VoucherRepository,
};
use roadly_core::Clock;
use roadly_hold::{HoldPolicy, SeatLockManager};
use roadly_shared::DomainEvent;
use roadly_store::app_config::Config;
use roadly_store::{
    LogEventPublisher, MemoryBookingRepository, MemoryPaymentRepository, MemorySeatLockStore,
    MemoryTripRepository, MemoryVoucherRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::events::FanoutPublisher;
use crate::metrics::Metrics;
use crate::middleware::resiliency::CircuitBreaker;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

/// Everything the router needs that comes from configuration.
#[derive(Clone, Debug)]
pub struct Settings {
    pub auth: AuthConfig,
    pub hold_policy: HoldPolicy,
    pub currency: String,
    pub webhook_secret: String,
    pub breaker_threshold: usize,
    pub breaker_reset: Duration,
    pub reaper_batch_size: usize,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        let rules = &config.business_rules;
        Self {
            auth: AuthConfig {
                secret: config.auth.jwt_secret.clone(),
                expiration: config.auth.jwt_expiration_seconds,
            },
            hold_policy: HoldPolicy {
                hold_seconds: rules.seat_hold_seconds as i64,
                extension_seconds: rules.hold_extension_seconds as i64,
                max_extensions: rules.max_hold_extensions,
                max_seats_per_session: rules.max_seats_per_session,
                booking_cutoff_minutes: rules.booking_cutoff_minutes,
            },
            currency: rules.currency.clone(),
            webhook_secret: config.payments.webhook_secret.clone(),
            breaker_threshold: config.payments.circuit_failure_threshold,
            breaker_reset: Duration::from_secs(config.payments.circuit_reset_seconds),
            reaper_batch_size: rules.reaper_batch_size,
        }
    }
}

/// Storage, gateway and clock the engine runs on.
pub struct Backend {
    pub trips: Arc<dyn TripRepository>,
    pub seat_locks: Arc<dyn SeatLockStore>,
    pub bookings: Arc<dyn BookingRepository>,
    pub vouchers: Arc<dyn VoucherRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    /// Where events go after the in-process fan-out.
    pub events: Arc<dyn EventPublisher>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub clock: Arc<dyn Clock>,
}

impl Backend {
    pub fn in_memory(gateway: Arc<MockPaymentGateway>, clock: Arc<dyn Clock>) -> Self {
        Self {
            trips: Arc::new(MemoryTripRepository::new()),
            seat_locks: Arc::new(MemorySeatLockStore::new()),
            bookings: Arc::new(MemoryBookingRepository::new()),
            vouchers: Arc::new(MemoryVoucherRepository::new()),
            payments: Arc::new(MemoryPaymentRepository::new()),
            events: Arc::new(LogEventPublisher),
            gateway,
            clock,
        }
    }
}

pub struct Resiliency {
    pub payment_cb: CircuitBreaker,
}

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<TripCatalog>,
    pub holds: Arc<SeatLockManager>,
    pub bookings: Arc<BookingService>,
    pub payments: Arc<PaymentReconciler>,
    pub vouchers: Arc<VoucherValidator>,
    pub reaper: Arc<HoldExpiryReaper>,
    pub metrics: Arc<Metrics>,
    pub clock: Arc<dyn Clock>,
    pub sse_tx: broadcast::Sender<DomainEvent>,
    pub auth: AuthConfig,
    pub resiliency: Arc<Resiliency>,
}

impl AppState {
    pub fn build(backend: Backend, settings: &Settings) -> Result<Self, prometheus::Error> {
        let metrics = Arc::new(Metrics::new()?);
        let (sse_tx, _) = broadcast::channel(100);
        let events: Arc<dyn EventPublisher> =
            Arc::new(FanoutPublisher::new(sse_tx.clone(), metrics.clone(), backend.events));
        let clock = backend.clock;

        let catalog = Arc::new(TripCatalog::new(backend.trips.clone(), clock.clone(), settings.currency.clone()));
        let holds = Arc::new(SeatLockManager::new(
            backend.trips,
            backend.seat_locks,
            events.clone(),
            clock.clone(),
            settings.hold_policy,
        ));
        let vouchers = Arc::new(VoucherValidator::new(backend.vouchers, clock.clone()));
        let bookings = Arc::new(BookingService::new(
            backend.bookings.clone(),
            backend.payments.clone(),
            holds.clone(),
            vouchers.clone(),
            FareCalculator::new(),
            backend.gateway.clone(),
            events.clone(),
            clock.clone(),
        ));
        let payments = Arc::new(PaymentReconciler::new(
            backend.payments,
            bookings.clone(),
            backend.gateway,
            events,
            clock.clone(),
            settings.webhook_secret.as_bytes(),
        ));
        let reaper = Arc::new(HoldExpiryReaper::new(
            backend.bookings,
            bookings.clone(),
            clock.clone(),
            settings.reaper_batch_size,
        ));

        Ok(Self {
            catalog,
            holds,
            bookings,
            payments,
            vouchers,
            reaper,
            metrics,
            clock,
            sse_tx,
            auth: settings.auth.clone(),
            resiliency: Arc::new(Resiliency {
                payment_cb: CircuitBreaker::new("payments", settings.breaker_threshold, settings.breaker_reset),
            }),
        })
    }
}

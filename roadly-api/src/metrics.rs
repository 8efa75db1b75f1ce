use axum::{extract::State, http::header, response::IntoResponse};
use prometheus::{opts, IntCounter, IntCounterVec, Registry, TextEncoder};
use roadly_shared::DomainEvent;

use crate::error::AppError;
use crate::state::AppState;

/// Prometheus counters for the booking flow. Kept in a private registry so
/// several app instances (one per integration test) can coexist.
pub struct Metrics {
    registry: Registry,
    holds_created: IntCounter,
    hold_conflicts: IntCounter,
    holds_released: IntCounterVec,
    bookings: IntCounterVec,
    callbacks: IntCounterVec,
    reaper_sweeps: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let holds_created = IntCounter::new("roadly_holds_created_total", "Seat holds granted")?;
        let hold_conflicts = IntCounter::new(
            "roadly_hold_conflicts_total",
            "Hold requests rejected because a seat was taken",
        )?;
        let holds_released = IntCounterVec::new(
            opts!("roadly_holds_released_total", "Seats returned to the pool"),
            &["reason"],
        )?;
        let bookings = IntCounterVec::new(
            opts!("roadly_bookings_total", "Booking state changes"),
            &["status"],
        )?;
        let callbacks = IntCounterVec::new(
            opts!("roadly_payment_callbacks_total", "Payment gateway callbacks"),
            &["outcome"],
        )?;
        let reaper_sweeps = IntCounter::new("roadly_reaper_sweeps_total", "Completed reaper sweeps")?;

        registry.register(Box::new(holds_created.clone()))?;
        registry.register(Box::new(hold_conflicts.clone()))?;
        registry.register(Box::new(holds_released.clone()))?;
        registry.register(Box::new(bookings.clone()))?;
        registry.register(Box::new(callbacks.clone()))?;
        registry.register(Box::new(reaper_sweeps.clone()))?;

        Ok(Self {
            registry,
            holds_created,
            hold_conflicts,
            holds_released,
            bookings,
            callbacks,
            reaper_sweeps,
        })
    }

    /// Counts state changes off the event stream.
    pub fn observe(&self, event: &DomainEvent) {
        match event {
            DomainEvent::SeatsHeld(_) => self.holds_created.inc(),
            DomainEvent::SeatsReleased(e) => {
                let reason = match e.reason {
                    roadly_hold::ReleaseReason::Released => "released",
                    roadly_hold::ReleaseReason::Expired => "expired",
                    roadly_hold::ReleaseReason::Cancelled => "cancelled",
                };
                self.holds_released
                    .with_label_values(&[reason])
                    .inc_by(e.seat_numbers.len() as u64);
            }
            DomainEvent::BookingConfirmed(_) => self.bookings.with_label_values(&["confirmed"]).inc(),
            DomainEvent::BookingExpired(_) => self.bookings.with_label_values(&["expired"]).inc(),
            DomainEvent::BookingCancelled(_) => self.bookings.with_label_values(&["cancelled"]).inc(),
            _ => {}
        }
    }

    pub fn record_hold_conflict(&self) {
        self.hold_conflicts.inc();
    }

    pub fn record_callback(&self, outcome: &str) {
        self.callbacks.with_label_values(&[outcome]).inc();
    }

    pub fn record_sweep(&self) {
        self.reaper_sweeps.inc();
    }

    pub fn export(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// GET /metrics
pub async fn export_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state
        .metrics
        .export()
        .map_err(|e| AppError::InternalServerError(format!("metrics encoding failed: {}", e)))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

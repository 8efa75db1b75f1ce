use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    /// One trial request at a time goes through
    HalfOpen,
}

pub struct CircuitBreaker {
    pub name: String,
    state: RwLock<CircuitState>,
    failure_count: AtomicUsize,
    trial_in_flight: AtomicBool,
    failure_threshold: usize,
    reset_timeout: Duration,
    last_failure: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            trial_in_flight: AtomicBool::new(false),
            failure_threshold: threshold.max(1),
            reset_timeout: timeout,
            last_failure: RwLock::new(None),
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Whether a request may go through. An open breaker turns half-open once
    /// `reset_timeout` has passed since the last failure, and then lets a
    /// single trial request through until that trial is recorded.
    pub async fn check(&self) -> bool {
        let state = *self.state.read().await;
        match state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.take_trial(),
            CircuitState::Open => {
                let mut state = self.state.write().await;
                match *state {
                    CircuitState::Closed => true,
                    CircuitState::HalfOpen => self.take_trial(),
                    CircuitState::Open => {
                        let last_fail = *self.last_failure.read().await;
                        match last_fail {
                            Some(instant) if instant.elapsed() > self.reset_timeout => {
                                *state = CircuitState::HalfOpen;
                                tracing::info!("Circuit Breaker [{}] moving to Half-Open", self.name);
                                self.take_trial()
                            }
                            _ => false,
                        }
                    }
                }
            }
        }
    }

    fn take_trial(&self) -> bool {
        self.trial_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        self.trial_in_flight.store(false, Ordering::SeqCst);
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            tracing::info!("Circuit Breaker [{}] recovered to Closed", self.name);
        }
        if *state == CircuitState::Closed {
            self.failure_count.store(0, Ordering::SeqCst);
        }
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;
        self.trial_in_flight.store(false, Ordering::SeqCst);

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            *self.last_failure.write().await = Some(Instant::now());
            tracing::error!("Circuit Breaker [{}] TRIPPED to Open. Failures: {}", self.name, count);
        }
    }
}

fn is_payment_route(path: &str) -> bool {
    path.starts_with("/v1/bookings/") && path.ends_with("/payments")
}

/// Fails payment creation fast while the gateway keeps erroring. Only 5xx
/// responses count as failures.
pub async fn circuit_breaker_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !is_payment_route(req.uri().path()) {
        return next.run(req).await;
    }

    let cb = &state.resiliency.payment_cb;
    if !cb.check().await {
        return AppError::ServiceUnavailable(format!("Circuit Breaker [{}] is OPEN", cb.name)).into_response();
    }

    let response = next.run(req).await;
    if response.status().is_server_error() {
        cb.record_failure().await;
    } else {
        cb.record_success().await;
    }
    response
}

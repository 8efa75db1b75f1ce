use axum::{
    http::Method,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use serde::de::DeserializeOwned;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod auth;
pub mod bookings;
pub mod error;
pub mod events;
pub mod holds;
pub mod metrics;
pub mod middleware;
pub mod state;
pub mod trips;
pub mod vouchers;
pub mod webhooks;
pub mod worker;

pub use error::AppError;
pub use state::{AppState, AuthConfig, Backend, Settings};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let customer = Router::new()
        .route("/v1/trips/{trip_id}/seats", get(trips::seat_map))
        .route("/v1/trips/{trip_id}/stream", get(trips::seat_stream))
        .route(
            "/v1/trips/{trip_id}/holds",
            post(holds::hold_seats).get(holds::get_hold).delete(holds::release_seats),
        )
        .route("/v1/trips/{trip_id}/holds/extend", post(holds::extend_hold))
        .route("/v1/vouchers/validate", post(vouchers::validate_voucher))
        .route("/v1/bookings", post(bookings::create_booking))
        .route("/v1/bookings/{code}", get(bookings::get_booking))
        .route("/v1/bookings/{code}/confirm", post(bookings::confirm_booking))
        .route("/v1/bookings/{code}/cancel", post(bookings::cancel_booking))
        .route("/v1/bookings/{code}/payments", post(bookings::create_payment))
        .route_layer(from_fn_with_state(state.clone(), middleware::customer_auth_middleware));

    let operator = Router::new()
        .route("/v1/admin/trips", post(admin::register_trip))
        .route("/v1/admin/trips/{trip_id}/bookings", get(admin::trip_bookings))
        .route("/v1/admin/bookings/{code}/cancel", post(admin::cancel_booking))
        .route("/v1/admin/vouchers", post(admin::create_voucher))
        .route("/v1/admin/vouchers/{code}", get(admin::get_voucher))
        .route_layer(from_fn_with_state(state.clone(), middleware::operator_auth_middleware));

    Router::new()
        .route("/health", get(metrics::health))
        .route("/metrics", get(metrics::export_metrics))
        .route("/v1/trips", get(trips::list_trips))
        .route("/v1/webhooks/payments", post(webhooks::payment_callback))
        .merge(auth::routes())
        .merge(customer)
        .merge(operator)
        .layer(from_fn_with_state(state.clone(), middleware::circuit_breaker_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Parses an optional JSON body: empty means `T::default()`.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::ValidationError(format!("Invalid JSON body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holds::ReleaseRequest;

    #[test]
    fn test_optional_json_accepts_empty_body() {
        let request: ReleaseRequest = optional_json(b"").unwrap();
        assert!(request.seats.is_none());
        let request: ReleaseRequest = optional_json(br#"{"seats":["A1"]}"#).unwrap();
        assert_eq!(request.seats, Some(vec!["A1".to_string()]));
        assert!(optional_json::<ReleaseRequest>(b"{oops").is_err());
    }
}

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use roadly_booking::{Actor, CreateBooking};
use roadly_core::{Booking, Payment, PaymentMethod};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::CustomerClaims;
use crate::optional_json;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BookingDetails {
    #[serde(flatten)]
    pub booking: Booking,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub method: PaymentMethod,
}

fn customer(claims: &CustomerClaims) -> Actor {
    Actor::Customer(claims.sub.clone())
}

/// POST /v1/bookings
pub async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(request): Json<CreateBooking>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let booking = state.bookings.create_booking(&claims.sub, request).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// GET /v1/bookings/{code}
pub async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(code): Path<String>,
) -> Result<Json<BookingDetails>, AppError> {
    let booking = state.bookings.booking_for(&code, &customer(&claims)).await?;
    let payments = state.bookings.payments_for(&booking.booking_code).await?;
    Ok(Json(BookingDetails { booking, payments }))
}

/// POST /v1/bookings/{code}/confirm
/// Succeeds once a payment for the booking has settled; repeating it is harmless.
pub async fn confirm_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(code): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.bookings.booking_for(&code, &customer(&claims)).await?;
    Ok(Json(state.bookings.confirm_booking(&booking.booking_code).await?))
}

/// POST /v1/bookings/{code}/cancel
pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<Booking>, AppError> {
    let request: CancelRequest = optional_json(&body)?;
    let booking = state
        .bookings
        .cancel_booking(&code, &customer(&claims), request.reason)
        .await?;
    Ok(Json(booking))
}

/// POST /v1/bookings/{code}/payments
pub async fn create_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(code): Path<String>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    let payment = state
        .payments
        .create_payment(&claims.sub, &code, request.method)
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use roadly_booking::{Actor, NewVoucher, VoucherError};
use roadly_catalog::NewTrip;
use roadly_core::{Booking, BookingStatus, Trip, Voucher};
use serde::Serialize;
use uuid::Uuid;

use crate::bookings::CancelRequest;
use crate::error::AppError;
use crate::middleware::OperatorClaims;
use crate::optional_json;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TripBookings {
    pub trip_id: Uuid,
    pub held: usize,
    pub confirmed: usize,
    pub bookings: Vec<Booking>,
}

/// POST /v1/admin/trips
pub async fn register_trip(
    State(state): State<AppState>,
    Extension(claims): Extension<OperatorClaims>,
    Json(request): Json<NewTrip>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let trip = state.catalog.register_trip(request).await?;
    tracing::info!("Operator {} registered trip {}", claims.sub, trip.id);
    Ok((StatusCode::CREATED, Json(trip)))
}

/// GET /v1/admin/trips/{trip_id}/bookings
pub async fn trip_bookings(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<TripBookings>, AppError> {
    state.catalog.get_trip(trip_id).await?;
    let bookings = state.bookings.bookings_for_trip(trip_id).await?;
    let count = |status: BookingStatus| bookings.iter().filter(|b| b.status == status).count();

    Ok(Json(TripBookings {
        trip_id,
        held: count(BookingStatus::Held),
        confirmed: count(BookingStatus::Confirmed),
        bookings,
    }))
}

/// POST /v1/admin/bookings/{code}/cancel
/// Operators may cancel any booking; the sales cutoff still applies.
pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<OperatorClaims>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<Booking>, AppError> {
    let request: CancelRequest = optional_json(&body)?;
    let booking = state
        .bookings
        .cancel_booking(&code, &Actor::Operator(claims.sub), request.reason)
        .await?;
    Ok(Json(booking))
}

/// POST /v1/admin/vouchers
pub async fn create_voucher(
    State(state): State<AppState>,
    Json(request): Json<NewVoucher>,
) -> Result<(StatusCode, Json<Voucher>), AppError> {
    let voucher = state.vouchers.create(request).await?;
    Ok((StatusCode::CREATED, Json(voucher)))
}

/// GET /v1/admin/vouchers/{code}
pub async fn get_voucher(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Voucher>, AppError> {
    match state.vouchers.get(&code).await {
        Ok(voucher) => Ok(Json(voucher)),
        Err(e @ VoucherError::NotFound(_)) => Err(AppError::NotFoundError(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

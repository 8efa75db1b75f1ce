use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use roadly_hold::{HoldError, HoldSummary};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CustomerClaims;
use crate::optional_json;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HoldRequest {
    pub seats: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReleaseRequest {
    #[serde(default)]
    pub seats: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub released: Vec<String>,
}

/// POST /v1/trips/{trip_id}/holds
pub async fn hold_seats(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(trip_id): Path<Uuid>,
    Json(request): Json<HoldRequest>,
) -> Result<(StatusCode, Json<HoldSummary>), AppError> {
    match state.holds.hold_seats(trip_id, &claims.sub, &request.seats).await {
        Ok(summary) => Ok((StatusCode::CREATED, Json(summary))),
        Err(e) => {
            if matches!(e, HoldError::Conflict(_)) {
                state.metrics.record_hold_conflict();
            }
            Err(e.into())
        }
    }
}

/// GET /v1/trips/{trip_id}/holds
pub async fn get_hold(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<HoldSummary>, AppError> {
    state
        .holds
        .session_hold(trip_id, &claims.sub)
        .await?
        .map(Json)
        .ok_or_else(|| HoldError::NoActiveHold.into())
}

/// POST /v1/trips/{trip_id}/holds/extend
pub async fn extend_hold(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<HoldSummary>, AppError> {
    Ok(Json(state.bookings.extend_hold(trip_id, &claims.sub).await?))
}

/// DELETE /v1/trips/{trip_id}/holds
/// Without a body every seat the session holds on the trip is released.
pub async fn release_seats(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(trip_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<ReleaseResponse>, AppError> {
    let request: ReleaseRequest = optional_json(&body)?;
    let released = state
        .holds
        .release_seats(trip_id, &claims.sub, request.seats.as_deref())
        .await?;
    Ok(Json(ReleaseResponse { released }))
}

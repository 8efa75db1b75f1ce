use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use futures_util::stream::{Stream, StreamExt};
use roadly_catalog::Occupancy;
use roadly_core::Trip;
use roadly_hold::SeatMap;
use serde::Serialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CustomerClaims;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TripSummary {
    #[serde(flatten)]
    pub trip: Trip,
    pub sales_open: bool,
}

/// GET /v1/trips
pub async fn list_trips(State(state): State<AppState>) -> Result<Json<Vec<TripSummary>>, AppError> {
    let now = state.clock.now();
    let cutoff = state.holds.policy().cutoff();
    let trips = state
        .catalog
        .list_trips()
        .await?
        .into_iter()
        .map(|trip| TripSummary {
            sales_open: trip.accepts_holds(now, cutoff),
            trip,
        })
        .collect();
    Ok(Json(trips))
}

#[derive(Debug, Serialize)]
pub struct SeatMapResponse {
    #[serde(flatten)]
    pub map: SeatMap,
    pub utilization: f64,
}

/// GET /v1/trips/{trip_id}/seats
pub async fn seat_map(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<SeatMapResponse>, AppError> {
    let map = state.holds.seat_map(trip_id, Some(&claims.sub)).await?;
    let utilization = utilization(&map.occupancy);
    Ok(Json(SeatMapResponse { map, utilization }))
}

fn utilization(occupancy: &Occupancy) -> f64 {
    (occupancy.utilization() * 1000.0).round() / 1000.0
}

/// GET /v1/trips/{trip_id}/stream
/// Server-sent seat events for one trip, named after their topic.
pub async fn seat_stream(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    state.holds.trip(trip_id).await?;

    let rx = state.sse_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(event) if event.seat_trip_id() == Some(trip_id) => {
                match Event::default().event(event.topic()).json_data(&event) {
                    Ok(sse) => Some(Ok(sse)),
                    Err(e) => {
                        tracing::error!("Failed to encode seat event: {}", e);
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(lagged) => {
                tracing::warn!("Seat stream for trip {} lagged: {}", trip_id, lagged);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

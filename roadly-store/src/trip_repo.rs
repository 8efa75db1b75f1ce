use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roadly_core::repository::TripRepository;
use roadly_core::{CoreResult, SeatLayout, Trip, TripStatus};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{bad_column, db_error};

pub struct PgTripRepository {
    pool: PgPool,
}

impl PgTripRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TripRow {
    id: Uuid,
    route_code: String,
    origin: String,
    destination: String,
    departure_at: DateTime<Utc>,
    fare: i64,
    currency: String,
    status: String,
    seat_layout: Json<SeatLayout>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TripRow> for Trip {
    type Error = roadly_core::CoreError;

    fn try_from(row: TripRow) -> Result<Self, Self::Error> {
        Ok(Trip {
            id: row.id,
            route_code: row.route_code,
            origin: row.origin,
            destination: row.destination,
            departure_at: row.departure_at,
            fare: row.fare,
            currency: row.currency,
            status: TripStatus::parse(&row.status).ok_or_else(|| bad_column("trip status", &row.status))?,
            seat_layout: row.seat_layout.0,
            created_at: row.created_at,
        })
    }
}

const SELECT_TRIP: &str = "SELECT id, route_code, origin, destination, departure_at, fare, currency, status, seat_layout, created_at FROM trips";

#[async_trait]
impl TripRepository for PgTripRepository {
    async fn save_trip(&self, trip: &Trip) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trips (id, route_code, origin, destination, departure_at, fare, currency, status, seat_layout, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                route_code = EXCLUDED.route_code,
                origin = EXCLUDED.origin,
                destination = EXCLUDED.destination,
                departure_at = EXCLUDED.departure_at,
                fare = EXCLUDED.fare,
                currency = EXCLUDED.currency,
                status = EXCLUDED.status,
                seat_layout = EXCLUDED.seat_layout
            "#,
        )
        .bind(trip.id)
        .bind(&trip.route_code)
        .bind(&trip.origin)
        .bind(&trip.destination)
        .bind(trip.departure_at)
        .bind(trip.fare)
        .bind(&trip.currency)
        .bind(trip.status.as_str())
        .bind(Json(&trip.seat_layout))
        .bind(trip.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_trip(&self, id: Uuid) -> CoreResult<Option<Trip>> {
        let row: Option<TripRow> = sqlx::query_as(&format!("{} WHERE id = $1", SELECT_TRIP))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.map(Trip::try_from).transpose()
    }

    async fn list_trips(&self) -> CoreResult<Vec<Trip>> {
        let rows: Vec<TripRow> = sqlx::query_as(&format!("{} ORDER BY departure_at", SELECT_TRIP))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(Trip::try_from).collect()
    }
}

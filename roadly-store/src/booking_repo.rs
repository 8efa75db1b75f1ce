use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roadly_core::repository::BookingRepository;
use roadly_core::{Booking, BookingStatus, ContactInfo, CoreResult};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{bad_column, db_error};

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    booking_code: String,
    trip_id: Uuid,
    session_id: String,
    status: String,
    seats: Vec<String>,
    contact_info: Json<ContactInfo>,
    base_price: i64,
    discount: i64,
    final_price: i64,
    currency: String,
    voucher_code: Option<String>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = roadly_core::CoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            status: BookingStatus::parse(&row.status)
                .ok_or_else(|| bad_column("booking status", &row.status))?,
            booking_code: row.booking_code,
            trip_id: row.trip_id,
            session_id: row.session_id,
            seats: row.seats,
            contact_info: row.contact_info.0,
            base_price: row.base_price,
            discount: row.discount,
            final_price: row.final_price,
            currency: row.currency,
            voucher_code: row.voucher_code,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            confirmed_at: row.confirmed_at,
            cancelled_at: row.cancelled_at,
            cancellation_reason: row.cancellation_reason,
        })
    }
}

const SELECT_BOOKING: &str = "SELECT booking_code, trip_id, session_id, status, seats, contact_info, base_price, discount, final_price, currency, voucher_code, expires_at, created_at, updated_at, confirmed_at, cancelled_at, cancellation_reason FROM bookings";

fn into_bookings(rows: Vec<BookingRow>) -> CoreResult<Vec<Booking>> {
    rows.into_iter().map(Booking::try_from).collect()
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert_booking(&self, booking: &Booking) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (booking_code, trip_id, session_id, status, seats, contact_info, base_price, discount, final_price, currency, voucher_code, expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&booking.booking_code)
        .bind(booking.trip_id)
        .bind(&booking.session_id)
        .bind(booking.status.as_str())
        .bind(&booking.seats)
        .bind(Json(&booking.contact_info))
        .bind(booking.base_price)
        .bind(booking.discount)
        .bind(booking.final_price)
        .bind(&booking.currency)
        .bind(&booking.voucher_code)
        .bind(booking.expires_at)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_booking(&self, booking_code: &str) -> CoreResult<Option<Booking>> {
        let row: Option<BookingRow> =
            sqlx::query_as(&format!("{} WHERE booking_code = $1", SELECT_BOOKING))
                .bind(booking_code)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        row.map(Booking::try_from).transpose()
    }

    async fn update_booking(&self, booking: &Booking, expected: BookingStatus) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bookings SET
                status = $1, expires_at = $2, updated_at = $3, confirmed_at = $4,
                cancelled_at = $5, cancellation_reason = $6
            WHERE booking_code = $7 AND status = $8
            "#,
        )
        .bind(booking.status.as_str())
        .bind(booking.expires_at)
        .bind(booking.updated_at)
        .bind(booking.confirmed_at)
        .bind(booking.cancelled_at)
        .bind(&booking.cancellation_reason)
        .bind(&booking.booking_code)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_expired_holds(&self, now: DateTime<Utc>, limit: usize) -> CoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "{} WHERE status = 'HELD' AND expires_at <= $1 ORDER BY expires_at LIMIT $2",
            SELECT_BOOKING
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        into_bookings(rows)
    }

    async fn list_held_for_session(&self, trip_id: Uuid, session_id: &str) -> CoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "{} WHERE trip_id = $1 AND session_id = $2 AND status = 'HELD'",
            SELECT_BOOKING
        ))
        .bind(trip_id)
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        into_bookings(rows)
    }

    async fn list_for_trip(&self, trip_id: Uuid) -> CoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "{} WHERE trip_id = $1 ORDER BY created_at",
            SELECT_BOOKING
        ))
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        into_bookings(rows)
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roadly_core::repository::PaymentRepository;
use roadly_core::{CoreResult, Payment, PaymentMethod, PaymentStatus};
use sqlx::PgPool;

use crate::database::{bad_column, db_error};

pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    payment_code: String,
    booking_code: String,
    method: String,
    amount: i64,
    currency: String,
    status: String,
    gateway_reference: Option<String>,
    checkout_url: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = roadly_core::CoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            method: PaymentMethod::parse(&row.method).ok_or_else(|| bad_column("payment method", &row.method))?,
            status: PaymentStatus::parse(&row.status).ok_or_else(|| bad_column("payment status", &row.status))?,
            payment_code: row.payment_code,
            booking_code: row.booking_code,
            amount: row.amount,
            currency: row.currency,
            gateway_reference: row.gateway_reference,
            checkout_url: row.checkout_url,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_PAYMENT: &str = "SELECT payment_code, booking_code, method, amount, currency, status, gateway_reference, checkout_url, failure_reason, created_at, updated_at FROM payments";

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn insert_payment(&self, payment: &Payment) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (payment_code, booking_code, method, amount, currency, status, gateway_reference, checkout_url, failure_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&payment.payment_code)
        .bind(&payment.booking_code)
        .bind(payment.method.as_str())
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.gateway_reference)
        .bind(&payment.checkout_url)
        .bind(&payment.failure_reason)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_payment(&self, payment_code: &str) -> CoreResult<Option<Payment>> {
        let row: Option<PaymentRow> =
            sqlx::query_as(&format!("{} WHERE payment_code = $1", SELECT_PAYMENT))
                .bind(payment_code)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        row.map(Payment::try_from).transpose()
    }

    async fn list_for_booking(&self, booking_code: &str) -> CoreResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "{} WHERE booking_code = $1 ORDER BY created_at",
            SELECT_PAYMENT
        ))
        .bind(booking_code)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn update_payment(&self, payment: &Payment, expected: PaymentStatus) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                status = $1, gateway_reference = $2, checkout_url = $3, failure_reason = $4, updated_at = $5
            WHERE payment_code = $6 AND status = $7
            "#,
        )
        .bind(payment.status.as_str())
        .bind(&payment.gateway_reference)
        .bind(&payment.checkout_url)
        .bind(&payment.failure_reason)
        .bind(payment.updated_at)
        .bind(&payment.payment_code)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn callback_seen(&self, event_id: &str) -> CoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM payment_callbacks WHERE event_id = $1)")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn record_callback(&self, event_id: &str, received_at: DateTime<Utc>) -> CoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO payment_callbacks (event_id, received_at) VALUES ($1, $2) ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(received_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }
}

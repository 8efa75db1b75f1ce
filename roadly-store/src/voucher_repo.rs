use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roadly_core::repository::VoucherRepository;
use roadly_core::{CoreResult, DiscountRule, Voucher};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::database::db_error;

pub struct PgVoucherRepository {
    pool: PgPool,
}

impl PgVoucherRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct VoucherRow {
    code: String,
    description: String,
    discount: Json<DiscountRule>,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    max_uses: Option<i32>,
    used_count: i32,
    min_order_amount: i64,
    route_codes: Vec<String>,
    is_active: bool,
}

impl From<VoucherRow> for Voucher {
    fn from(row: VoucherRow) -> Self {
        Voucher {
            code: row.code,
            description: row.description,
            discount: row.discount.0,
            valid_from: row.valid_from,
            valid_until: row.valid_until,
            max_uses: row.max_uses.map(|m| m.max(0) as u32),
            used_count: row.used_count.max(0) as u32,
            min_order_amount: row.min_order_amount,
            route_codes: row.route_codes,
            is_active: row.is_active,
        }
    }
}

#[async_trait]
impl VoucherRepository for PgVoucherRepository {
    async fn save_voucher(&self, voucher: &Voucher) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO vouchers (code, description, discount, valid_from, valid_until, max_uses, used_count, min_order_amount, route_codes, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (code) DO UPDATE SET
                description = EXCLUDED.description,
                discount = EXCLUDED.discount,
                valid_from = EXCLUDED.valid_from,
                valid_until = EXCLUDED.valid_until,
                max_uses = EXCLUDED.max_uses,
                min_order_amount = EXCLUDED.min_order_amount,
                route_codes = EXCLUDED.route_codes,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(Voucher::normalize_code(&voucher.code))
        .bind(&voucher.description)
        .bind(Json(&voucher.discount))
        .bind(voucher.valid_from)
        .bind(voucher.valid_until)
        .bind(voucher.max_uses.map(|m| m as i32))
        .bind(voucher.used_count as i32)
        .bind(voucher.min_order_amount)
        .bind(&voucher.route_codes)
        .bind(voucher.is_active)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_voucher(&self, code: &str) -> CoreResult<Option<Voucher>> {
        let row: Option<VoucherRow> = sqlx::query_as(
            "SELECT code, description, discount, valid_from, valid_until, max_uses, used_count, min_order_amount, route_codes, is_active FROM vouchers WHERE code = $1",
        )
        .bind(Voucher::normalize_code(code))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(Voucher::from))
    }

    async fn reserve_use(&self, code: &str) -> CoreResult<bool> {
        // Single conditional UPDATE: concurrent reservations cannot overshoot max_uses
        let result = sqlx::query(
            "UPDATE vouchers SET used_count = used_count + 1 WHERE code = $1 AND (max_uses IS NULL OR used_count < max_uses)",
        )
        .bind(Voucher::normalize_code(code))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_use(&self, code: &str) -> CoreResult<()> {
        sqlx::query("UPDATE vouchers SET used_count = GREATEST(used_count - 1, 0) WHERE code = $1")
            .bind(Voucher::normalize_code(code))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

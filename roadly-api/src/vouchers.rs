use axum::{extract::State, Json};
use roadly_booking::VoucherQuote;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ValidateVoucherRequest {
    pub code: String,
    pub trip_id: Uuid,
    pub amount: i64,
}

/// POST /v1/vouchers/validate
/// Quotes the discount without taking a use; the use is taken when a booking
/// is created with the code.
pub async fn validate_voucher(
    State(state): State<AppState>,
    Json(request): Json<ValidateVoucherRequest>,
) -> Result<Json<VoucherQuote>, AppError> {
    if request.amount < 0 {
        return Err(AppError::ValidationError("amount cannot be negative".to_string()));
    }
    let trip = state.catalog.get_trip(request.trip_id).await?;
    let quote = state.vouchers.validate(&request.code, &trip, request.amount).await?;
    Ok(Json(quote))
}

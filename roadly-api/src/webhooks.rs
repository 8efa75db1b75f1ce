use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-signature";

/// POST /v1/webhooks/payments
/// The raw body is verified against `X-Signature` before it is parsed.
pub async fn payment_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::AuthenticationError("Missing X-Signature header".to_string()))?;

    match state.payments.handle_callback(&body, signature).await {
        Ok(outcome) => {
            state.metrics.record_callback(outcome.as_str());
            tracing::info!("Payment callback processed: {}", outcome.as_str());
            Ok(Json(json!({ "outcome": outcome })))
        }
        Err(e) => {
            state.metrics.record_callback("rejected");
            tracing::warn!("Payment callback rejected: {}", e);
            Err(e.into())
        }
    }
}

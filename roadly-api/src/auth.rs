use axum::{extract::State, routing::post, Json, Router};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use uuid::Uuid;

use crate::{error::AppError, middleware::auth::CustomerClaims, state::AppState};

#[derive(Debug, Serialize)]
struct AuthResponse {
    token: String,
    session_id: String,
    expires_at: i64,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/auth/guest", post(login_guest))
}

/// POST /v1/auth/guest
/// Every guest token carries a fresh session id; holds and bookings belong to it.
async fn login_guest(State(state): State<AppState>) -> Result<Json<AuthResponse>, AppError> {
    let session_id = format!("guest-{}", Uuid::new_v4());
    let expires_at = (Utc::now() + Duration::seconds(state.auth.expiration as i64)).timestamp();
    let claims = CustomerClaims {
        sub: session_id.clone(),
        role: "GUEST".to_owned(),
        exp: expires_at as usize,
    };

    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(state.auth.secret.as_bytes()))
        .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))?;

    Ok(Json(AuthResponse { token, session_id, expires_at }))
}

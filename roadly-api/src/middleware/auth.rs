use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

/// `sub` is the session id that owns holds and bookings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CustomerClaims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OperatorClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: String,
    pub exp: usize,
}

const CUSTOMER_ROLES: [&str; 2] = ["GUEST", "CUSTOMER"];
const OPERATOR_ROLES: [&str; 2] = ["OPERATOR", "ADMIN"];

fn bearer_claims<T: DeserializeOwned>(req: &Request, secret: &str) -> Result<T, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::AuthenticationError("Missing bearer token".to_string()))?;

    decode::<T>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| AppError::AuthenticationError(format!("Invalid token: {}", e)))
}

// ============================================================================
// Customer Authentication Middleware
// ============================================================================

pub async fn customer_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims: CustomerClaims = bearer_claims(&req, &state.auth.secret)?;
    if !CUSTOMER_ROLES.contains(&claims.role.as_str()) {
        return Err(AppError::AuthorizationError(format!("Role {} cannot book", claims.role)));
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

// ============================================================================
// Operator Authentication Middleware
// ============================================================================

pub async fn operator_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims: OperatorClaims = bearer_claims(&req, &state.auth.secret)?;
    if !OPERATOR_ROLES.contains(&claims.role.as_str()) {
        return Err(AppError::AuthorizationError("Operator role required".to_string()));
    }

    tracing::debug!("Operator {} ({}) authenticated", claims.sub, claims.role);
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

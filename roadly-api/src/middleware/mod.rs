pub mod auth;
pub mod resiliency;

pub use auth::{customer_auth_middleware, operator_auth_middleware, CustomerClaims, OperatorClaims};
pub use resiliency::circuit_breaker_middleware;

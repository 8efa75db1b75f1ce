use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use roadly_booking::{BookingError, PaymentError, TransitionError, VoucherError};
use roadly_catalog::CatalogError;
use roadly_core::CoreError;
use roadly_hold::HoldError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    AuthorizationError(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    NotFoundError(String),
    /// Seats involved in a conflict are echoed back so the client can
    /// repaint them.
    #[error("{message}")]
    ConflictError { message: String, seats: Vec<String> },
    #[error("{0}")]
    GoneError(String),
    #[error("{0}")]
    RejectedError(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    InternalServerError(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::ConflictError { message: message.into(), seats: Vec::new() }
    }

    fn conflict_on(message: impl Into<String>, seats: Vec<String>) -> Self {
        AppError::ConflictError { message: message.into(), seats }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            AppError::AuthorizationError(_) => StatusCode::FORBIDDEN,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFoundError(_) => StatusCode::NOT_FOUND,
            AppError::ConflictError { .. } => StatusCode::CONFLICT,
            AppError::GoneError(_) => StatusCode::GONE,
            AppError::RejectedError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalServerError(_) | AppError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::ConflictError { message, seats } if !seats.is_empty() => json!({
                "error": message,
                "seats": seats,
            }),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                json!({ "error": "Internal Server Error" })
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {:#}", err);
                json!({ "error": "Internal Server Error" })
            }
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                json!({ "error": msg })
            }
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) => AppError::ValidationError(msg),
            CoreError::GatewayError(msg) => AppError::ServiceUnavailable(format!("Payment gateway unavailable: {}", msg)),
            CoreError::StorageError(msg) | CoreError::InternalError(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::InvalidTrip(_) => AppError::ValidationError(err.to_string()),
            CatalogError::NotFound(_) => AppError::NotFoundError(err.to_string()),
            CatalogError::Storage(core) => core.into(),
        }
    }
}

impl From<HoldError> for AppError {
    fn from(err: HoldError) -> Self {
        match err {
            HoldError::EmptySelection
            | HoldError::DuplicateSeat(_)
            | HoldError::UnknownSeats(_)
            | HoldError::TooManySeats { .. } => AppError::ValidationError(err.to_string()),
            HoldError::TripNotFound(_) | HoldError::NoActiveHold => AppError::NotFoundError(err.to_string()),
            HoldError::TripClosed(_) => AppError::GoneError(err.to_string()),
            HoldError::ExtensionLimit { .. } => AppError::conflict(err.to_string()),
            HoldError::Conflict(ref seats) | HoldError::HoldLost(ref seats) => {
                let seats = seats.clone();
                AppError::conflict_on(err.to_string(), seats)
            }
            HoldError::Storage(core) => core.into(),
        }
    }
}

impl From<VoucherError> for AppError {
    fn from(err: VoucherError) -> Self {
        match err {
            VoucherError::Invalid(_) => AppError::ValidationError(err.to_string()),
            VoucherError::Core(core) => core.into(),
            rejection => AppError::RejectedError(rejection.to_string()),
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        AppError::conflict(err.to_string())
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::NotFound(_) => AppError::NotFoundError(err.to_string()),
            BookingError::NotOwner => AppError::AuthorizationError(err.to_string()),
            BookingError::InvalidContact(_) | BookingError::InvalidRequest(_) => {
                AppError::ValidationError(err.to_string())
            }
            BookingError::SeatsNotHeld(ref seats) | BookingError::SeatsInOtherBooking { ref seats, .. } => {
                let seats = seats.clone();
                AppError::conflict_on(err.to_string(), seats)
            }
            BookingError::Expired(_) => AppError::GoneError(err.to_string()),
            BookingError::PaymentRequired(_)
            | BookingError::CancellationClosed(_)
            | BookingError::Conflict(_) => AppError::conflict(err.to_string()),
            BookingError::Transition(e) => e.into(),
            BookingError::Hold(e) => e.into(),
            BookingError::Voucher(e) => e.into(),
            BookingError::Catalog(e) => e.into(),
            BookingError::Core(e) => e.into(),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotFound(_) => AppError::NotFoundError(err.to_string()),
            PaymentError::InvalidSignature => AppError::AuthenticationError(err.to_string()),
            PaymentError::MalformedCallback(_) | PaymentError::AmountMismatch { .. } => {
                AppError::ValidationError(err.to_string())
            }
            PaymentError::NotPayable { .. } => AppError::conflict(err.to_string()),
            PaymentError::Booking(e) => e.into(),
            PaymentError::Core(e) => e.into(),
        }
    }
}

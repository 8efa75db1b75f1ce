use chrono::{DateTime, Utc};
use roadly_core::repository::VoucherRepository;
use roadly_core::{Clock, CoreError, DiscountRule, Trip, Voucher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum VoucherError {
    #[error("Voucher not found: {0}")]
    NotFound(String),

    #[error("Voucher {0} is not active")]
    Inactive(String),

    #[error("Voucher {0} is not valid yet")]
    NotYetValid(String),

    #[error("Voucher {0} has expired")]
    Expired(String),

    #[error("Voucher {0} has no uses left")]
    Exhausted(String),

    #[error("Voucher {code} does not apply to route {route}")]
    RouteNotAllowed { code: String, route: String },

    #[error("Order amount {amount} is below the voucher minimum {minimum}")]
    BelowMinimum { minimum: i64, amount: i64 },

    #[error("Invalid voucher: {0}")]
    Invalid(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result of applying a voucher to an order amount.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VoucherQuote {
    pub code: String,
    pub description: String,
    pub discount: i64,
    pub final_amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewVoucher {
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub discount: DiscountRule,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    pub max_uses: Option<u32>,
    #[serde(default)]
    pub min_order_amount: i64,
    #[serde(default)]
    pub route_codes: Vec<String>,
}

pub struct VoucherValidator {
    vouchers: Arc<dyn VoucherRepository>,
    clock: Arc<dyn Clock>,
}

impl VoucherValidator {
    pub fn new(vouchers: Arc<dyn VoucherRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { vouchers, clock }
    }

    /// Checks `code` against the trip and order amount. Rejections are
    /// reported in a fixed order: existence, activity, validity window,
    /// remaining uses, route, minimum amount.
    pub async fn validate(&self, code: &str, trip: &Trip, amount: i64) -> Result<VoucherQuote, VoucherError> {
        let code = Voucher::normalize_code(code);
        let voucher = self
            .vouchers
            .get_voucher(&code)
            .await?
            .ok_or_else(|| VoucherError::NotFound(code.clone()))?;

        let now = self.clock.now();
        if !voucher.is_active {
            return Err(VoucherError::Inactive(code));
        }
        if now < voucher.valid_from {
            return Err(VoucherError::NotYetValid(code));
        }
        if now > voucher.valid_until {
            return Err(VoucherError::Expired(code));
        }
        if !voucher.has_uses_left() {
            return Err(VoucherError::Exhausted(code));
        }
        if !voucher.applies_to_route(&trip.route_code) {
            return Err(VoucherError::RouteNotAllowed { code, route: trip.route_code.clone() });
        }
        if amount < voucher.min_order_amount {
            return Err(VoucherError::BelowMinimum { minimum: voucher.min_order_amount, amount });
        }

        let discount = voucher.discount.discount_for(amount);
        debug!("Voucher {} gives {} off {}", code, discount, amount);
        Ok(VoucherQuote {
            code,
            description: voucher.description,
            discount,
            final_amount: amount - discount,
        })
    }

    /// Takes one use of the voucher. Fails when another booking took the last one.
    pub async fn reserve(&self, code: &str) -> Result<(), VoucherError> {
        let code = Voucher::normalize_code(code);
        if self.vouchers.reserve_use(&code).await? {
            Ok(())
        } else {
            Err(VoucherError::Exhausted(code))
        }
    }

    pub async fn release(&self, code: &str) -> Result<(), VoucherError> {
        Ok(self.vouchers.release_use(&Voucher::normalize_code(code)).await?)
    }

    pub async fn create(&self, request: NewVoucher) -> Result<Voucher, VoucherError> {
        let code = Voucher::normalize_code(&request.code);
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(VoucherError::Invalid(format!("bad code '{}'", request.code)));
        }
        match request.discount {
            DiscountRule::Percentage { percent, max_discount } => {
                if percent == 0 || percent > 100 {
                    return Err(VoucherError::Invalid("percent must be 1..=100".to_string()));
                }
                if matches!(max_discount, Some(cap) if cap <= 0) {
                    return Err(VoucherError::Invalid("max_discount must be positive".to_string()));
                }
            }
            DiscountRule::Fixed { amount } if amount <= 0 => {
                return Err(VoucherError::Invalid("fixed amount must be positive".to_string()));
            }
            DiscountRule::Fixed { .. } => {}
        }
        if request.valid_until <= request.valid_from {
            return Err(VoucherError::Invalid("valid_until must be after valid_from".to_string()));
        }
        if request.min_order_amount < 0 {
            return Err(VoucherError::Invalid("min_order_amount cannot be negative".to_string()));
        }

        let voucher = Voucher {
            code,
            description: request.description,
            discount: request.discount,
            valid_from: request.valid_from,
            valid_until: request.valid_until,
            max_uses: request.max_uses,
            used_count: 0,
            min_order_amount: request.min_order_amount,
            route_codes: request.route_codes.iter().map(|r| r.trim().to_uppercase()).collect(),
            is_active: true,
        };
        self.vouchers.save_voucher(&voucher).await?;
        info!("Created voucher {}", voucher.code);
        Ok(voucher)
    }

    pub async fn get(&self, code: &str) -> Result<Voucher, VoucherError> {
        let code = Voucher::normalize_code(code);
        self.vouchers
            .get_voucher(&code)
            .await?
            .ok_or(VoucherError::NotFound(code))
    }
}

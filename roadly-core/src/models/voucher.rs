use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountRule {
    Percentage {
        percent: u8,
        #[serde(default)]
        max_discount: Option<i64>,
    },
    Fixed {
        amount: i64,
    },
}

impl DiscountRule {
    /// Discount in minor units, never more than `amount`.
    pub fn discount_for(&self, amount: i64) -> i64 {
        if amount <= 0 {
            return 0;
        }
        let raw = match self {
            DiscountRule::Percentage { percent, max_discount } => {
                let pct = amount.saturating_mul(i64::from(*percent)) / 100;
                match max_discount {
                    Some(cap) => pct.min(*cap),
                    None => pct,
                }
            }
            DiscountRule::Fixed { amount: fixed } => *fixed,
        };
        raw.clamp(0, amount)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub code: String,
    pub description: String,
    pub discount: DiscountRule,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub max_uses: Option<u32>,
    pub used_count: u32,
    pub min_order_amount: i64,
    #[serde(default)]
    pub route_codes: Vec<String>,
    pub is_active: bool,
}

impl Voucher {
    /// Codes are matched case-insensitively and stored upper-case.
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn has_uses_left(&self) -> bool {
        self.max_uses.map_or(true, |max| self.used_count < max)
    }

    pub fn applies_to_route(&self, route_code: &str) -> bool {
        self.route_codes.is_empty() || self.route_codes.iter().any(|r| r == route_code)
    }
}

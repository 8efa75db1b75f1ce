use chrono::{DateTime, Utc};
use roadly_shared::Masked;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Held,
    Confirmed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Held => "HELD",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "HELD" => Some(BookingStatus::Held),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            "EXPIRED" => Some(BookingStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Expired)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactInfo {
    pub full_name: String,
    pub phone: Masked<String>,
    #[serde(default)]
    pub email: Option<Masked<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub booking_code: String,
    pub trip_id: Uuid,
    pub session_id: String,
    pub status: BookingStatus,
    pub seats: Vec<String>,
    pub contact_info: ContactInfo,
    pub base_price: i64,
    pub discount: i64,
    pub final_price: i64,
    pub currency: String,
    pub voucher_code: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl Booking {
    /// A held booking whose window has closed is dead even before the reaper sees it.
    pub fn is_hold_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Held && self.expires_at <= now
    }
}

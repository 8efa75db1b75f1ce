use roadly_core::Trip;
use serde::Serialize;

use crate::catalog::CatalogError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SeatFare {
    pub seat_number: String,
    pub fare: i64,
}

/// Price of a seat selection before any voucher.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FareQuote {
    pub seats: Vec<SeatFare>,
    pub base_price: i64,
    pub currency: String,
}

impl FareQuote {
    /// Final amount once `discount` is taken off. Never negative.
    pub fn final_price(&self, discount: i64) -> i64 {
        (self.base_price - discount.max(0)).max(0)
    }
}

/// Per-seat fare calculation: the trip fare unless the seat overrides it.
#[derive(Debug, Clone, Copy, Default)]
pub struct FareCalculator;

impl FareCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn quote(&self, trip: &Trip, seats: &[String]) -> Result<FareQuote, CatalogError> {
        if seats.is_empty() {
            return Err(CatalogError::InvalidTrip("no seats to price".to_string()));
        }
        let mut priced = Vec::with_capacity(seats.len());
        let mut base_price: i64 = 0;
        for number in seats {
            let fare = trip
                .seat_fare(number)
                .ok_or_else(|| CatalogError::InvalidTrip(format!("seat {} is not on trip {}", number, trip.id)))?;
            base_price = base_price.saturating_add(fare);
            priced.push(SeatFare { seat_number: number.clone(), fare });
        }
        Ok(FareQuote {
            seats: priced,
            base_price,
            currency: trip.currency.clone(),
        })
    }
}

use chrono::{DateTime, Utc};
use roadly_core::repository::TripRepository;
use roadly_core::{Clock, CoreError, SeatLayout, Trip, TripStatus};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const MAX_GRID_ROWS: u16 = 26;
const MAX_DECKS: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Invalid trip: {0}")]
    InvalidTrip(String),

    #[error("Trip not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Storage(#[from] CoreError),
}

/// Seat layout as submitted by an operator: either a regular grid or an
/// explicit seat list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LayoutRequest {
    Grid { decks: u8, rows: u16, columns: u16 },
    Seats(SeatLayout),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTrip {
    pub route_code: String,
    pub origin: String,
    pub destination: String,
    pub departure_at: DateTime<Utc>,
    pub fare: i64,
    #[serde(default)]
    pub currency: Option<String>,
    pub layout: LayoutRequest,
}

/// Registry of scheduled trips and their seat inventories.
pub struct TripCatalog {
    trips: Arc<dyn TripRepository>,
    clock: Arc<dyn Clock>,
    default_currency: String,
}

impl TripCatalog {
    pub fn new(trips: Arc<dyn TripRepository>, clock: Arc<dyn Clock>, default_currency: impl Into<String>) -> Self {
        Self {
            trips,
            clock,
            default_currency: default_currency.into(),
        }
    }

    pub async fn register_trip(&self, request: NewTrip) -> Result<Trip, CatalogError> {
        let now = self.clock.now();
        if request.route_code.trim().is_empty() {
            return Err(CatalogError::InvalidTrip("route_code is required".to_string()));
        }
        if request.origin.trim().is_empty() || request.destination.trim().is_empty() {
            return Err(CatalogError::InvalidTrip("origin and destination are required".to_string()));
        }
        if request.origin.trim().eq_ignore_ascii_case(request.destination.trim()) {
            return Err(CatalogError::InvalidTrip("origin and destination must differ".to_string()));
        }
        if request.fare <= 0 {
            return Err(CatalogError::InvalidTrip("fare must be positive".to_string()));
        }
        if request.departure_at <= now {
            return Err(CatalogError::InvalidTrip("departure must be in the future".to_string()));
        }

        let seat_layout = build_layout(request.layout)?;
        validate_layout(&seat_layout)?;

        let trip = Trip {
            id: Uuid::new_v4(),
            route_code: request.route_code.trim().to_uppercase(),
            origin: request.origin.trim().to_string(),
            destination: request.destination.trim().to_string(),
            departure_at: request.departure_at,
            fare: request.fare,
            currency: request.currency.unwrap_or_else(|| self.default_currency.clone()),
            status: TripStatus::Scheduled,
            seat_layout,
            created_at: now,
        };
        self.trips.save_trip(&trip).await?;
        info!(
            "Registered trip {} on {} with {} seats",
            trip.id,
            trip.route_code,
            trip.seat_layout.capacity()
        );
        Ok(trip)
    }

    pub async fn get_trip(&self, id: Uuid) -> Result<Trip, CatalogError> {
        self.trips.get_trip(id).await?.ok_or(CatalogError::NotFound(id))
    }

    pub async fn list_trips(&self) -> Result<Vec<Trip>, CatalogError> {
        Ok(self.trips.list_trips().await?)
    }
}

fn build_layout(request: LayoutRequest) -> Result<SeatLayout, CatalogError> {
    match request {
        LayoutRequest::Grid { decks, rows, columns } => {
            if decks == 0 || decks > MAX_DECKS {
                return Err(CatalogError::InvalidTrip(format!("decks must be 1..={}", MAX_DECKS)));
            }
            if rows == 0 || rows > MAX_GRID_ROWS {
                return Err(CatalogError::InvalidTrip(format!("rows must be 1..={}", MAX_GRID_ROWS)));
            }
            if columns == 0 {
                return Err(CatalogError::InvalidTrip("columns must be positive".to_string()));
            }
            Ok(SeatLayout::grid(decks, rows, columns))
        }
        // Holds look seats up upper-cased.
        LayoutRequest::Seats(mut layout) => {
            for seat in &mut layout.seats {
                seat.number = seat.number.trim().to_uppercase();
            }
            Ok(layout)
        }
    }
}

/// Seat numbers must be non-empty, alphanumeric and unique; fare overrides positive.
pub fn validate_layout(layout: &SeatLayout) -> Result<(), CatalogError> {
    if layout.seats.is_empty() {
        return Err(CatalogError::InvalidTrip("seat layout is empty".to_string()));
    }
    let mut seen = HashSet::with_capacity(layout.seats.len());
    for seat in &layout.seats {
        if seat.number.is_empty() || !seat.number.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CatalogError::InvalidTrip(format!("invalid seat number '{}'", seat.number)));
        }
        if !seen.insert(seat.number.as_str()) {
            return Err(CatalogError::InvalidTrip(format!("duplicate seat number {}", seat.number)));
        }
        if matches!(seat.fare_override, Some(fare) if fare <= 0) {
            return Err(CatalogError::InvalidTrip(format!("seat {} has a non-positive fare", seat.number)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use roadly_core::{ManualClock, SeatDef};
    use roadly_store::MemoryTripRepository;

    fn catalog() -> TripCatalog {
        TripCatalog::new(
            Arc::new(MemoryTripRepository::new()),
            Arc::new(ManualClock::new(Utc::now())),
            "VND",
        )
    }

    fn request(layout: LayoutRequest) -> NewTrip {
        NewTrip {
            route_code: "sgn-dlt".to_string(),
            origin: "Sai Gon".to_string(),
            destination: "Da Lat".to_string(),
            departure_at: Utc::now() + Duration::hours(8),
            fare: 300_000,
            currency: None,
            layout,
        }
    }

    fn seat(number: &str) -> SeatDef {
        SeatDef { number: number.to_string(), deck: 1, row: 1, column: 1, fare_override: None }
    }

    #[tokio::test]
    async fn test_register_grid_trip() {
        let catalog = catalog();
        let trip = catalog
            .register_trip(request(LayoutRequest::Grid { decks: 2, rows: 10, columns: 2 }))
            .await
            .unwrap();

        assert_eq!(trip.route_code, "SGN-DLT");
        assert_eq!(trip.currency, "VND");
        assert_eq!(trip.seat_layout.capacity(), 40);
        assert_eq!(catalog.get_trip(trip.id).await.unwrap().id, trip.id);
    }

    #[tokio::test]
    async fn test_explicit_seat_numbers_are_upper_cased() {
        let catalog = catalog();
        let layout = SeatLayout { seats: vec![seat("a1"), seat(" b2 ")] };
        let trip = catalog.register_trip(request(LayoutRequest::Seats(layout))).await.unwrap();
        let numbers: Vec<&str> = trip.seat_layout.seats.iter().map(|s| s.number.as_str()).collect();
        assert_eq!(numbers, vec!["A1", "B2"]);

        let clash = SeatLayout { seats: vec![seat("a1"), seat("A1")] };
        assert!(catalog.register_trip(request(LayoutRequest::Seats(clash))).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_duplicate_seats() {
        let layout = SeatLayout { seats: vec![seat("A1"), seat("A1")] };
        let err = catalog().register_trip(request(LayoutRequest::Seats(layout))).await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidTrip(msg) if msg.contains("duplicate")));
    }

    #[tokio::test]
    async fn test_rejects_past_departure_and_bad_grid() {
        let catalog = catalog();
        let mut past = request(LayoutRequest::Grid { decks: 1, rows: 2, columns: 2 });
        past.departure_at = Utc::now() - Duration::hours(1);
        assert!(catalog.register_trip(past).await.is_err());

        let too_many_rows = request(LayoutRequest::Grid { decks: 1, rows: 27, columns: 2 });
        assert!(catalog.register_trip(too_many_rows).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_trip() {
        let id = Uuid::new_v4();
        assert!(matches!(catalog().get_trip(id).await, Err(CatalogError::NotFound(found)) if found == id));
    }

    #[test]
    fn test_validate_layout_rejects_symbols() {
        let layout = SeatLayout { seats: vec![seat("A-1")] };
        assert!(validate_layout(&layout).is_err());
        assert!(validate_layout(&SeatLayout::default()).is_err());
    }
}

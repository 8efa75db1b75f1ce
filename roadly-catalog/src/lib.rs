pub mod catalog;
pub mod inventory;
pub mod pricing;

pub use catalog::{CatalogError, LayoutRequest, NewTrip, TripCatalog};
pub use inventory::Occupancy;
pub use pricing::{FareCalculator, FareQuote};

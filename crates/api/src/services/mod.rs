//! External service integrations and background import execution.

pub mod geocoding;
pub mod import_runner;
pub mod sirene;

pub use geocoding::{GeocodingClient, GeocodingService, GeocodingSummary};
pub use import_runner::ImportRunner;
pub use sirene::SireneClient;

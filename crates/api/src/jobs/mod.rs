//! Background job scheduler and job implementations.

mod geocoding_sweep;
mod scheduler;

pub use geocoding_sweep::GeocodingSweepJob;
pub use scheduler::{Job, JobScheduler};

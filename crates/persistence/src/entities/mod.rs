//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod establishment;
pub mod import_job;
pub mod site;

pub use establishment::{EstablishmentEntity, GeocodingCandidateEntity};
pub use import_job::ImportJobEntity;
pub use site::SiteEntity;

//! Repository implementations for database operations.

pub mod establishment;
pub mod import_job;
pub mod site;

pub use establishment::EstablishmentRepository;
pub use import_job::ImportJobRepository;
pub use site::{SiteInput, SiteRepository};

//! Domain services for the Annuaire backend.
//!
//! Services contain the import pipeline logic that operates on domain models.

pub mod filters;
pub mod import;
pub mod reconciler;
pub mod registry;
pub mod store;

pub use filters::build_import_filters;
pub use import::{ImportError, ImportOrchestrator};
pub use reconciler::{derive_establishment, reconcile_record, ReconcileOutcome, RecordError};
pub use registry::{MockRegistrySource, RegistryError, RegistryPager, RegistrySource};
pub use store::{ImportStore, InMemoryImportStore, StoreError};

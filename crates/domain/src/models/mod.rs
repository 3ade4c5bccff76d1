//! Domain models for the Annuaire backend.

pub mod establishment;
pub mod import_job;
pub mod registry;
pub mod site;

pub use establishment::{
    Establishment, EstablishmentDraft, GeoPosition, ListEstablishmentsQuery,
    ListEstablishmentsResponse,
};
pub use import_job::{
    CreateImportJobRequest, ImportCheckpoint, ImportJob, ImportJobStatus, ListImportJobsResponse,
};
pub use registry::{RegistryPage, SireneEtablissement, SirenePeriode, SireneUniteLegale};
pub use site::{ListSitesResponse, RegistryFilters, Site, UpsertSiteRequest};

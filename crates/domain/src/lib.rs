//! Domain layer for the Annuaire backend.
//!
//! This crate contains:
//! - Domain models (Site, Establishment, ImportJob, registry payloads)
//! - The import pipeline: filter construction, registry paging,
//!   record reconciliation and the job orchestrator
//! - The persistence and registry traits the pipeline depends on

pub mod models;
pub mod services;

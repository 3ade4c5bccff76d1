//! Registry query construction for import jobs.

use crate::models::registry::{FILTER_ADMINISTRATIVE_STATE, FILTER_DIFFUSION_STATUS};
use crate::models::site::{
    FILTER_COMMUNE_CODE, FILTER_DEPARTMENT_CODE, FILTER_NAF_CODE, SITE_FILTER_KEYS,
};
use crate::models::{ImportJob, RegistryFilters, Site};

/// Publicly diffusible records only.
const DIFFUSION_STATUS_PUBLIC: &str = "O";
/// Active, dormant and closed establishments.
const ADMINISTRATIVE_STATES: &str = "A,B,F";

/// Build the effective registry filters for a job.
///
/// Base filters come first, then the site's defaults, then the job's own
/// overrides, each layer winning over the previous one for the same key.
pub fn build_import_filters(site: &Site, job: &ImportJob) -> RegistryFilters {
    let mut filters = RegistryFilters::new();
    filters.insert(
        FILTER_DIFFUSION_STATUS.to_string(),
        DIFFUSION_STATUS_PUBLIC.to_string(),
    );
    filters.insert(
        FILTER_ADMINISTRATIVE_STATE.to_string(),
        ADMINISTRATIVE_STATES.to_string(),
    );

    for key in SITE_FILTER_KEYS {
        if let Some(value) = site.filter(key) {
            filters.insert(key.to_string(), value.to_string());
        }
    }

    let overrides = [
        (FILTER_NAF_CODE, job.naf_code.as_deref()),
        (FILTER_DEPARTMENT_CODE, job.department.as_deref()),
        (FILTER_COMMUNE_CODE, job.city.as_deref()),
    ];
    for (key, value) in overrides {
        if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
            filters.insert(key.to_string(), value.to_string());
        }
    }

    filters
}

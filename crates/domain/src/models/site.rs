//! Site domain model.
//!
//! A site is one business-directory vertical. Its SIRENE filters seed every
//! import job started for it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Registry query parameters, keyed by SIRENE parameter name.
pub type RegistryFilters = BTreeMap<String, String>;

/// NAF activity code filter key.
pub const FILTER_NAF_CODE: &str = "codeNaf";
/// Postal code filter key.
pub const FILTER_POSTAL_CODE: &str = "codePostalEtablissement";
/// INSEE commune code filter key.
pub const FILTER_COMMUNE_CODE: &str = "codeCommuneEtablissement";
/// Department code filter key.
pub const FILTER_DEPARTMENT_CODE: &str = "codeDepartementEtablissement";

/// Filter keys a site may set as defaults for its imports.
pub const SITE_FILTER_KEYS: [&str; 4] = [
    FILTER_NAF_CODE,
    FILTER_POSTAL_CODE,
    FILTER_COMMUNE_CODE,
    FILTER_DEPARTMENT_CODE,
];

/// Represents a directory site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Site {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub sirene_filters: RegistryFilters,
    pub created_at: DateTime<Utc>,
}

impl Site {
    /// Non-blank value of a site-level filter default.
    pub fn filter(&self, key: &str) -> Option<&str> {
        self.sirene_filters
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Request payload for creating or replacing a site.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct UpsertSiteRequest {
    #[validate(length(min = 2, max = 200, message = "Name must be 2-200 characters"))]
    pub name: String,

    #[validate(length(min = 2, max = 100, message = "Slug must be 2-100 characters"))]
    #[validate(custom(function = "validate_slug"))]
    pub slug: String,

    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: Option<String>,

    #[validate(custom(function = "validate_sirene_filters"))]
    pub sirene_filters: Option<RegistryFilters>,
}

/// Response for listing sites.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ListSitesResponse {
    pub sites: Vec<Site>,
    pub total: usize,
}

lazy_static::lazy_static! {
    pub static ref SLUG_REGEX: regex::Regex = regex::Regex::new(r"^[a-z0-9][a-z0-9-]*[a-z0-9]$").unwrap();
}

fn validate_slug(slug: &str) -> Result<(), validator::ValidationError> {
    if SLUG_REGEX.is_match(slug) {
        Ok(())
    } else {
        let mut err = validator::ValidationError::new("invalid_slug");
        err.message =
            Some("Slug may only contain lowercase letters, digits and inner hyphens".into());
        Err(err)
    }
}

fn validate_sirene_filters(filters: &RegistryFilters) -> Result<(), validator::ValidationError> {
    for (key, value) in filters {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            FILTER_NAF_CODE => shared::validation::validate_naf_code(value)?,
            FILTER_POSTAL_CODE => shared::validation::validate_postal_code(value)?,
            FILTER_COMMUNE_CODE => shared::validation::validate_commune_code(value)?,
            FILTER_DEPARTMENT_CODE => shared::validation::validate_department_code(value)?,
            _ => {
                let mut err = validator::ValidationError::new("unknown_filter");
                err.message = Some(
                    format!(
                        "Unknown SIRENE filter '{}', expected one of {}",
                        key,
                        SITE_FILTER_KEYS.join(", ")
                    )
                    .into(),
                );
                return Err(err);
            }
        }
    }
    Ok(())
}

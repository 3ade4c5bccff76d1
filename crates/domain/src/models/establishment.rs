//! Establishment domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label attached to establishments the registry reports as closed.
pub const CLOSURE_LABEL: &str = "Définitivement fermé";

/// Geocoding status for addresses the geocoder could not match. Such rows
/// are not looked up again.
pub const GEO_STATUS_NOT_FOUND: &str = "not_found";

/// Default page size when listing establishments.
pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Maximum page size when listing establishments.
pub const MAX_LIST_LIMIT: i64 = 500;

/// One registry-reported business location owned by a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Establishment {
    pub id: i64,
    pub site_id: i64,
    pub siren: String,
    pub nic: String,
    /// Unique within a site; stable across re-imports.
    pub siret: String,
    pub business_name: Option<String>,
    pub naf_code: Option<String>,
    pub naf_label: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub department: Option<String>,
    pub is_active: bool,
    pub closure_label: Option<String>,
    pub extra_metadata: Option<serde_json::Value>,
    pub geo_lat: Option<f64>,
    pub geo_lon: Option<f64>,
    pub geo_status: Option<String>,
    pub imported_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Establishment {
    /// Build a new row from a draft, as first seen at `now`.
    pub fn from_draft(id: i64, site_id: i64, draft: &EstablishmentDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            site_id,
            siren: draft.siren.clone(),
            nic: draft.nic.clone(),
            siret: draft.siret.clone(),
            business_name: draft.business_name.clone(),
            naf_code: draft.naf_code.clone(),
            naf_label: draft.naf_label.clone(),
            address: draft.address.clone(),
            postal_code: draft.postal_code.clone(),
            city: draft.city.clone(),
            department: draft.department.clone(),
            is_active: draft.is_active,
            closure_label: draft.closure_label.clone(),
            extra_metadata: Some(draft.extra_metadata.clone()),
            geo_lat: None,
            geo_lon: None,
            geo_status: None,
            imported_at: now,
            last_seen_at: now,
        }
    }

    /// Overwrite the mutable fields with a later sighting.
    ///
    /// Identity, site ownership, geocoding and `imported_at` are kept.
    pub fn apply_draft(&mut self, draft: &EstablishmentDraft, now: DateTime<Utc>) {
        self.business_name = draft.business_name.clone();
        self.naf_code = draft.naf_code.clone();
        self.naf_label = draft.naf_label.clone();
        self.address = draft.address.clone();
        self.postal_code = draft.postal_code.clone();
        self.city = draft.city.clone();
        self.department = draft.department.clone();
        self.is_active = draft.is_active;
        self.closure_label = draft.closure_label.clone();
        self.extra_metadata = Some(draft.extra_metadata.clone());
        self.last_seen_at = now;
    }
}

/// Fields derived from one registry record, ready to insert or apply.
#[derive(Debug, Clone, PartialEq)]
pub struct EstablishmentDraft {
    pub siren: String,
    pub nic: String,
    pub siret: String,
    pub business_name: Option<String>,
    pub naf_code: Option<String>,
    pub naf_label: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub department: Option<String>,
    pub is_active: bool,
    /// Always set when `is_active` is false.
    pub closure_label: Option<String>,
    pub extra_metadata: serde_json::Value,
}

/// Coordinates resolved by the geocoder.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
    /// Match score reported by the geocoder.
    pub score: Option<f64>,
}

/// Query parameters for listing establishments of a site.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ListEstablishmentsQuery {
    pub active: Option<bool>,
    pub postal_code: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListEstablishmentsQuery {
    /// Limit clamped to `1..=MAX_LIST_LIMIT`.
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Response for listing establishments.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ListEstablishmentsResponse {
    pub establishments: Vec<Establishment>,
    /// Matches before limit and offset.
    pub total: i64,
}

//! Establishment entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database row mapping for the establishments table.
#[derive(Debug, Clone, FromRow)]
pub struct EstablishmentEntity {
    pub id: i64,
    pub site_id: i64,
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
    pub closure_label: Option<String>,
    pub extra_metadata: Option<serde_json::Value>,
    pub geo_lat: Option<f64>,
    pub geo_lon: Option<f64>,
    pub geo_status: Option<String>,
    pub imported_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl From<EstablishmentEntity> for domain::models::Establishment {
    fn from(entity: EstablishmentEntity) -> Self {
        Self {
            id: entity.id,
            site_id: entity.site_id,
            siren: entity.siren,
            nic: entity.nic,
            siret: entity.siret,
            business_name: entity.business_name,
            naf_code: entity.naf_code,
            naf_label: entity.naf_label,
            address: entity.address,
            postal_code: entity.postal_code,
            city: entity.city,
            department: entity.department,
            is_active: entity.is_active,
            closure_label: entity.closure_label,
            extra_metadata: entity.extra_metadata,
            geo_lat: entity.geo_lat,
            geo_lon: entity.geo_lon,
            geo_status: entity.geo_status,
            imported_at: entity.imported_at,
            last_seen_at: entity.last_seen_at,
        }
    }
}

/// Row selected by the geocoding sweep.
#[derive(Debug, Clone, FromRow)]
pub struct GeocodingCandidateEntity {
    pub id: i64,
    pub address: String,
    pub postal_code: Option<String>,
    pub city: Option<String>,
}

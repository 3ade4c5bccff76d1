//! Site entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::RegistryFilters;
use serde_json::Value;
use sqlx::FromRow;

/// Database row mapping for the sites table.
#[derive(Debug, Clone, FromRow)]
pub struct SiteEntity {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub sirene_filters: Value,
    pub created_at: DateTime<Utc>,
}

impl From<SiteEntity> for domain::models::Site {
    fn from(entity: SiteEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.name,
            slug: entity.slug,
            description: entity.description,
            sirene_filters: filters_from_json(&entity.sirene_filters),
            created_at: entity.created_at,
        }
    }
}

/// Keeps string and numeric values; anything else cannot be a query parameter.
fn filters_from_json(value: &Value) -> RegistryFilters {
    let Some(map) = value.as_object() else {
        return RegistryFilters::new();
    };
    map.iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key.clone(), s.clone())),
            Value::Number(n) => Some((key.clone(), n.to_string())),
            _ => None,
        })
        .collect()
}

//! Establishment repository for database operations.

use chrono::{DateTime, Utc};
use domain::models::establishment::GEO_STATUS_NOT_FOUND;
use domain::models::{EstablishmentDraft, GeoPosition, ListEstablishmentsQuery};
use sqlx::PgPool;

use crate::entities::{EstablishmentEntity, GeocodingCandidateEntity};
use crate::metrics::QueryTimer;

const ESTABLISHMENT_COLUMNS: &str = "id, site_id, siren, nic, siret, business_name, naf_code, \
                                     naf_label, address, postal_code, city, department, is_active, \
                                     closure_label, extra_metadata, geo_lat, geo_lon, geo_status, \
                                     imported_at, last_seen_at";

/// Repository for establishment database operations.
#[derive(Clone)]
pub struct EstablishmentRepository {
    pool: PgPool,
}

impl EstablishmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_siret(
        &self,
        site_id: i64,
        siret: &str,
    ) -> Result<Option<EstablishmentEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_establishment_by_siret");
        let result = sqlx::query_as::<_, EstablishmentEntity>(&format!(
            "SELECT {ESTABLISHMENT_COLUMNS} FROM establishments WHERE site_id = $1 AND siret = $2"
        ))
        .bind(site_id)
        .bind(siret)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    pub async fn insert(
        &self,
        site_id: i64,
        draft: &EstablishmentDraft,
        now: DateTime<Utc>,
    ) -> Result<EstablishmentEntity, sqlx::Error> {
        let timer = QueryTimer::new("insert_establishment");
        let result = sqlx::query_as::<_, EstablishmentEntity>(&format!(
            r#"
            INSERT INTO establishments (
                site_id, siren, nic, siret, business_name, naf_code, naf_label, address,
                postal_code, city, department, is_active, closure_label, extra_metadata,
                imported_at, last_seen_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
            RETURNING {ESTABLISHMENT_COLUMNS}
            "#
        ))
        .bind(site_id)
        .bind(&draft.siren)
        .bind(&draft.nic)
        .bind(&draft.siret)
        .bind(&draft.business_name)
        .bind(&draft.naf_code)
        .bind(&draft.naf_label)
        .bind(&draft.address)
        .bind(&draft.postal_code)
        .bind(&draft.city)
        .bind(&draft.department)
        .bind(draft.is_active)
        .bind(&draft.closure_label)
        .bind(&draft.extra_metadata)
        .bind(now)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Overwrite mutable fields; identity, geocoding and `imported_at` stay.
    pub async fn update(
        &self,
        establishment_id: i64,
        draft: &EstablishmentDraft,
        now: DateTime<Utc>,
    ) -> Result<Option<EstablishmentEntity>, sqlx::Error> {
        let timer = QueryTimer::new("update_establishment");
        let result = sqlx::query_as::<_, EstablishmentEntity>(&format!(
            r#"
            UPDATE establishments
            SET business_name = $2, naf_code = $3, naf_label = $4, address = $5,
                postal_code = $6, city = $7, department = $8, is_active = $9,
                closure_label = $10, extra_metadata = $11, last_seen_at = $12
            WHERE id = $1
            RETURNING {ESTABLISHMENT_COLUMNS}
            "#
        ))
        .bind(establishment_id)
        .bind(&draft.business_name)
        .bind(&draft.naf_code)
        .bind(&draft.naf_label)
        .bind(&draft.address)
        .bind(&draft.postal_code)
        .bind(&draft.city)
        .bind(&draft.department)
        .bind(draft.is_active)
        .bind(&draft.closure_label)
        .bind(&draft.extra_metadata)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Establishments of a site ordered by name, with the total match count.
    pub async fn list_for_site(
        &self,
        site_id: i64,
        query: &ListEstablishmentsQuery,
    ) -> Result<(Vec<EstablishmentEntity>, i64), sqlx::Error> {
        let timer = QueryTimer::new("list_establishments_for_site");
        let filter = r#"
            WHERE site_id = $1
              AND ($2::BOOLEAN IS NULL OR is_active = $2)
              AND ($3::TEXT IS NULL OR postal_code = $3)
        "#;

        let total: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM establishments {filter}"))
            .bind(site_id)
            .bind(query.active)
            .bind(query.postal_code.as_deref())
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, EstablishmentEntity>(&format!(
            r#"
            SELECT {ESTABLISHMENT_COLUMNS}
            FROM establishments
            {filter}
            ORDER BY business_name NULLS LAST, id
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(site_id)
        .bind(query.active)
        .bind(query.postal_code.as_deref())
        .bind(query.effective_limit())
        .bind(query.effective_offset())
        .fetch_all(&self.pool)
        .await?;
        timer.record();

        Ok((rows, total.0))
    }

    /// Next batch of establishments that have an address, no coordinates and
    /// no `not_found` verdict.
    pub async fn find_geocoding_candidates(
        &self,
        site_id: i64,
        limit: i64,
    ) -> Result<Vec<GeocodingCandidateEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_geocoding_candidates");
        let result = sqlx::query_as::<_, GeocodingCandidateEntity>(
            r#"
            SELECT id, address, postal_code, city
            FROM establishments
            WHERE site_id = $1
              AND geo_lat IS NULL
              AND address IS NOT NULL
              AND geo_status IS DISTINCT FROM $3
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(site_id)
        .bind(limit)
        .bind(GEO_STATUS_NOT_FOUND)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Store a geocoder match.
    pub async fn set_position(
        &self,
        establishment_id: i64,
        position: &GeoPosition,
    ) -> Result<(), sqlx::Error> {
        let status = position
            .score
            .map(|score| format!("{:.2}", score))
            .unwrap_or_else(|| "matched".to_string());
        sqlx::query(
            r#"
            UPDATE establishments
            SET geo_lat = $2, geo_lon = $3, geo_status = $4
            WHERE id = $1
            "#,
        )
        .bind(establishment_id)
        .bind(position.latitude)
        .bind(position.longitude)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a geocoding outcome without coordinates, such as `not_found`.
    pub async fn set_geo_status(
        &self,
        establishment_id: i64,
        status: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE establishments SET geo_status = $2 WHERE id = $1")
            .bind(establishment_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

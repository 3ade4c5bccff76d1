//! Site repository for database operations.

use domain::models::RegistryFilters;
use sqlx::PgPool;

use crate::entities::SiteEntity;
use crate::metrics::QueryTimer;

const SITE_COLUMNS: &str = "id, name, slug, description, sirene_filters, created_at";

/// Fields written when creating or replacing a site.
#[derive(Debug, Clone)]
pub struct SiteInput<'a> {
    pub name: &'a str,
    pub slug: &'a str,
    pub description: Option<&'a str>,
    pub sirene_filters: &'a RegistryFilters,
}

/// Repository for site database operations.
#[derive(Clone)]
pub struct SiteRepository {
    pool: PgPool,
}

impl SiteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, input: SiteInput<'_>) -> Result<SiteEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_site");
        let result = sqlx::query_as::<_, SiteEntity>(&format!(
            r#"
            INSERT INTO sites (name, slug, description, sirene_filters)
            VALUES ($1, $2, $3, $4)
            RETURNING {SITE_COLUMNS}
            "#
        ))
        .bind(input.name)
        .bind(input.slug)
        .bind(input.description)
        .bind(sqlx::types::Json(input.sirene_filters))
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    pub async fn find_by_id(&self, site_id: i64) -> Result<Option<SiteEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_site_by_id");
        let result = sqlx::query_as::<_, SiteEntity>(&format!(
            "SELECT {SITE_COLUMNS} FROM sites WHERE id = $1"
        ))
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// All sites, by name.
    pub async fn list(&self) -> Result<Vec<SiteEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_sites");
        let result = sqlx::query_as::<_, SiteEntity>(&format!(
            "SELECT {SITE_COLUMNS} FROM sites ORDER BY name, id"
        ))
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Replace a site's fields. Returns `None` when the site does not exist.
    pub async fn update(
        &self,
        site_id: i64,
        input: SiteInput<'_>,
    ) -> Result<Option<SiteEntity>, sqlx::Error> {
        let timer = QueryTimer::new("update_site");
        let result = sqlx::query_as::<_, SiteEntity>(&format!(
            r#"
            UPDATE sites
            SET name = $2, slug = $3, description = $4, sirene_filters = $5
            WHERE id = $1
            RETURNING {SITE_COLUMNS}
            "#
        ))
        .bind(site_id)
        .bind(input.name)
        .bind(input.slug)
        .bind(input.description)
        .bind(sqlx::types::Json(input.sirene_filters))
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Delete a site with its jobs and establishments.
    pub async fn delete(&self, site_id: i64) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("delete_site");
        let result = sqlx::query("DELETE FROM sites WHERE id = $1")
            .bind(site_id)
            .execute(&self.pool)
            .await?;
        timer.record();
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_ids(&self) -> Result<Vec<i64>, sqlx::Error> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM sites ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

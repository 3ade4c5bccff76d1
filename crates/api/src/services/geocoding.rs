//! Address geocoding through the BAN (Base Adresse Nationale) search API.
//!
//! The sweep walks the establishments of one site that have an address but
//! no coordinates, chunk by chunk, pausing between chunks to stay polite with
//! the public API.

use std::time::Duration;

use domain::models::establishment::GEO_STATUS_NOT_FOUND;
use domain::models::GeoPosition;
use persistence::repositories::EstablishmentRepository;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GeocodingConfig;
use crate::middleware::metrics::record_geocoding;

#[derive(Debug, Error)]
pub enum GeocodingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Geocoder returned status {0}")]
    Status(u16),

    #[error("Invalid response from geocoder: {0}")]
    InvalidResponse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Geometry,
    #[serde(default)]
    properties: FeatureProperties,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    /// `[longitude, latitude]`
    coordinates: Vec<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct FeatureProperties {
    score: Option<f64>,
}

/// Thin client over `GET /search/`.
#[derive(Debug, Clone)]
pub struct GeocodingClient {
    client: Client,
    base_url: String,
}

impl GeocodingClient {
    pub fn new(config: &GeocodingConfig) -> Result<Self, GeocodingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Best match for an address, or `None` when the geocoder has no feature.
    pub async fn geocode(
        &self,
        address: &str,
        city: Option<&str>,
    ) -> Result<Option<GeoPosition>, GeocodingError> {
        let mut query = vec![("q", address), ("limit", "1")];
        if let Some(city) = city.filter(|c| !c.trim().is_empty()) {
            query.push(("city", city));
        }

        let response = self
            .client
            .get(format!("{}/search/", self.base_url))
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodingError::Status(status.as_u16()));
        }

        let body: SearchResponse = response.json().await?;
        let Some(feature) = body.features.into_iter().next() else {
            return Ok(None);
        };

        match feature.geometry.coordinates.as_slice() {
            [longitude, latitude, ..] => Ok(Some(GeoPosition {
                latitude: *latitude,
                longitude: *longitude,
                score: feature.properties.score,
            })),
            other => Err(GeocodingError::InvalidResponse(format!(
                "expected [lon, lat], got {} coordinates",
                other.len()
            ))),
        }
    }
}

/// Counts from one sweep over a site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeocodingSummary {
    pub matched: u64,
    pub not_found: u64,
    pub failed: u64,
}

impl GeocodingSummary {
    pub fn processed(&self) -> u64 {
        self.matched + self.not_found + self.failed
    }
}

/// Geocodes the pending establishments of a site.
#[derive(Clone)]
pub struct GeocodingService {
    client: GeocodingClient,
    establishments: EstablishmentRepository,
    chunk_size: i64,
    delay: Duration,
}

impl GeocodingService {
    pub fn new(
        config: &GeocodingConfig,
        establishments: EstablishmentRepository,
    ) -> Result<Self, GeocodingError> {
        Ok(Self {
            client: GeocodingClient::new(config)?,
            establishments,
            chunk_size: i64::from(config.chunk_size.max(1)),
            delay: Duration::from_millis(config.delay_ms),
        })
    }

    /// Geocode every pending establishment of the site.
    ///
    /// Matches and `not_found` answers write a `geo_status`, so those rows
    /// never come back in a later chunk. A failed lookup leaves the row
    /// untouched and ends the sweep; the next sweep picks it up again.
    /// Database errors abort the sweep.
    pub async fn sweep_site(&self, site_id: i64) -> Result<GeocodingSummary, GeocodingError> {
        let mut summary = GeocodingSummary::default();

        'sweep: loop {
            let candidates = self
                .establishments
                .find_geocoding_candidates(site_id, self.chunk_size)
                .await?;
            if candidates.is_empty() {
                break;
            }

            for candidate in candidates {
                match self
                    .client
                    .geocode(&candidate.address, candidate.city.as_deref())
                    .await
                {
                    Ok(Some(position)) => {
                        self.establishments
                            .set_position(candidate.id, &position)
                            .await?;
                        summary.matched += 1;
                        record_geocoding("matched");
                    }
                    Ok(None) => {
                        debug!(
                            establishment_id = candidate.id,
                            postal_code = ?candidate.postal_code,
                            "No geocoding match"
                        );
                        self.establishments
                            .set_geo_status(candidate.id, GEO_STATUS_NOT_FOUND)
                            .await?;
                        summary.not_found += 1;
                        record_geocoding("not_found");
                    }
                    Err(e) => {
                        warn!(
                            site_id = site_id,
                            establishment_id = candidate.id,
                            error = %e,
                            "Geocoding lookup failed, stopping sweep until next run"
                        );
                        summary.failed += 1;
                        record_geocoding("error");
                        break 'sweep;
                    }
                }
            }

            tokio::time::sleep(self.delay).await;
        }

        if summary.processed() > 0 {
            info!(
                site_id = site_id,
                matched = summary.matched,
                not_found = summary.not_found,
                failed = summary.failed,
                "Geocoding sweep finished"
            );
        }
        Ok(summary)
    }
}

//! Periodic geocoding of every site's pending establishments.

use std::time::Duration;

use persistence::repositories::SiteRepository;
use tracing::warn;

use super::scheduler::Job;
use crate::services::geocoding::GeocodingService;

/// Sweeps all sites in turn; one failing site does not stop the others.
pub struct GeocodingSweepJob {
    sites: SiteRepository,
    geocoding: GeocodingService,
    interval: Duration,
}

impl GeocodingSweepJob {
    pub fn new(sites: SiteRepository, geocoding: GeocodingService, interval_minutes: u64) -> Self {
        Self {
            sites,
            geocoding,
            interval: Duration::from_secs(interval_minutes.max(1) * 60),
        }
    }
}

#[async_trait::async_trait]
impl Job for GeocodingSweepJob {
    fn name(&self) -> &'static str {
        "geocoding_sweep"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self) -> Result<(), String> {
        let site_ids = self
            .sites
            .list_ids()
            .await
            .map_err(|e| format!("listing sites: {}", e))?;

        let mut failed = 0usize;
        for site_id in site_ids {
            if let Err(e) = self.geocoding.sweep_site(site_id).await {
                warn!(site_id = site_id, error = %e, "Geocoding sweep failed for site");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(format!("{} site(s) could not be geocoded", failed));
        }
        Ok(())
    }
}

//! Database metrics.

use metrics::{gauge, histogram};
use sqlx::PgPool;
use std::time::Instant;

/// Record how long a named repository query took.
pub fn record_query_duration(query_name: &'static str, duration_secs: f64) {
    histogram!("db_query_duration_seconds", "query" => query_name).record(duration_secs);
}

/// Publish the current pool occupancy as gauges.
///
/// Called when metrics are scraped so the values are fresh.
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();

    gauge!("db_pool_connections", "state" => "active").set(size.saturating_sub(idle) as f64);
    gauge!("db_pool_connections", "state" => "idle").set(idle as f64);
}

/// Times one repository query.
///
/// ```ignore
/// let timer = QueryTimer::new("find_site_by_id");
/// let result = sqlx::query_as::<_, SiteEntity>(...).fetch_optional(&pool).await;
/// timer.record();
/// result
/// ```
pub struct QueryTimer {
    query_name: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query_name: &'static str) -> Self {
        Self {
            query_name,
            start: Instant::now(),
        }
    }

    pub fn record(self) {
        record_query_duration(self.query_name, self.start.elapsed().as_secs_f64());
    }
}

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use annuaire_api::app::{router, AppState};
use annuaire_api::config::Config;
use annuaire_api::jobs::{GeocodingSweepJob, JobScheduler};
use annuaire_api::middleware::{init_metrics, logging::init_logging};
use persistence::repositories::SiteRepository;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load().context("loading configuration")?;
    init_logging(&config.logging).context("initializing logging")?;
    init_metrics().context("installing metrics recorder")?;

    info!("Starting Annuaire API v{}", env!("CARGO_PKG_VERSION"));

    let pool = persistence::db::create_pool(&config.database.to_pool_config())
        .await
        .context("connecting to database")?;

    info!("Running database migrations");
    persistence::db::run_migrations(&pool)
        .await
        .context("running migrations")?;

    let addr = config.socket_addr().context("parsing server address")?;
    let sweep_minutes = config.geocoding.sweep_interval_minutes;
    let state = AppState::new(config, pool.clone());

    let mut scheduler = JobScheduler::new();
    if let Some(geocoding) = state.geocoding.clone() {
        scheduler.register(GeocodingSweepJob::new(
            SiteRepository::new(pool),
            geocoding,
            sweep_minutes,
        ));
    }
    scheduler.start();

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(address = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(10)).await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use domain::services::{ImportStore, RegistrySource};
use persistence::repositories::EstablishmentRepository;
use persistence::PgImportStore;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

use crate::config::Config;
use crate::middleware::{
    metrics_handler, metrics_middleware, rate_limit_middleware, trace_id, ClientRateLimiter,
};
use crate::routes::{establishments, health, imports, sites};
use crate::services::{GeocodingService, ImportRunner, SireneClient};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub rate_limiter: Option<ClientRateLimiter>,
    /// `None` when no registry credentials are configured.
    pub imports: Option<ImportRunner>,
    /// `None` when geocoding is disabled.
    pub geocoding: Option<GeocodingService>,
}

impl AppState {
    /// State backed by the SIRENE client built from configuration.
    pub fn new(config: Config, pool: PgPool) -> Self {
        let registry = match SireneClient::new(&config.sirene) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn RegistrySource>),
            Err(e) => {
                warn!(error = %e, "Registry imports disabled");
                None
            }
        };
        Self::with_registry(config, pool, registry)
    }

    /// State with an explicit registry source, or none to disable imports.
    pub fn with_registry(
        config: Config,
        pool: PgPool,
        registry: Option<Arc<dyn RegistrySource>>,
    ) -> Self {
        let geocoding = if config.geocoding.enabled {
            match GeocodingService::new(
                &config.geocoding,
                EstablishmentRepository::new(pool.clone()),
            ) {
                Ok(service) => Some(service),
                Err(e) => {
                    warn!(error = %e, "Geocoding disabled");
                    None
                }
            }
        } else {
            None
        };

        let store: Arc<dyn ImportStore> = Arc::new(PgImportStore::new(pool.clone()));
        let imports =
            registry.map(|registry| ImportRunner::new(store, registry, geocoding.clone()));

        Self {
            rate_limiter: ClientRateLimiter::new(config.security.rate_limit_per_minute),
            config: Arc::new(config),
            pool,
            imports,
            geocoding,
        }
    }
}

pub fn create_app(config: Config, pool: PgPool) -> Router {
    router(AppState::new(config, pool))
}

pub fn router(state: AppState) -> Router {
    let config = state.config.clone();

    let cors = if config.security.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let api_routes = Router::new()
        .route("/api/v1/sites", post(sites::create_site).get(sites::list_sites))
        .route(
            "/api/v1/sites/:site_id",
            get(sites::get_site)
                .put(sites::update_site)
                .delete(sites::delete_site),
        )
        .route(
            "/api/v1/sites/:site_id/imports",
            post(imports::create_import_job).get(imports::list_import_jobs),
        )
        .route(
            "/api/v1/sites/:site_id/imports/:job_id",
            get(imports::get_import_job),
        )
        .route(
            "/api/v1/sites/:site_id/imports/:job_id/resume",
            post(imports::resume_import_job),
        )
        .route(
            "/api/v1/sites/:site_id/establishments",
            get(establishments::list_establishments),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        // Bottom layers run first.
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use shared::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    /// SIRENE registry client configuration
    pub sirene: SireneConfig,
    /// BAN geocoding configuration
    #[serde(default)]
    pub geocoding: GeocodingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn to_pool_config(&self) -> persistence::db::DatabaseConfig {
        persistence::db::DatabaseConfig {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            connect_timeout_secs: self.connect_timeout_secs,
            idle_timeout_secs: self.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Inbound API requests allowed per client IP per minute
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SireneConfig {
    #[serde(default = "default_sirene_base_url")]
    pub base_url: String,

    /// OAuth token endpoint
    #[serde(default = "default_sirene_token_url")]
    pub token_url: String,

    /// Static bearer key; takes precedence over OAuth when set
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub oauth_client_id: Option<String>,

    #[serde(default)]
    pub oauth_client_secret: Option<String>,

    /// Outbound registry calls allowed per minute
    #[serde(default = "default_sirene_rate_limit")]
    pub rate_limit_per_minute: u32,

    #[serde(default = "default_sirene_page_size")]
    pub page_size: u32,

    #[serde(default = "default_sirene_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_sirene_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Attempts per page request, including the first
    #[serde(default = "default_sirene_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

impl SireneConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingConfig {
    #[serde(default = "default_geocoding_enabled")]
    pub enabled: bool,

    #[serde(default = "default_geocoding_base_url")]
    pub base_url: String,

    /// Establishments geocoded per batch
    #[serde(default = "default_geocoding_chunk_size")]
    pub chunk_size: u32,

    /// Pause between batches
    #[serde(default = "default_geocoding_delay_ms")]
    pub delay_ms: u64,

    #[serde(default = "default_geocoding_timeout")]
    pub timeout_secs: u64,

    /// Interval of the periodic sweep over all sites
    #[serde(default = "default_geocoding_sweep_interval")]
    pub sweep_interval_minutes: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: default_geocoding_enabled(),
            base_url: default_geocoding_base_url(),
            chunk_size: default_geocoding_chunk_size(),
            delay_ms: default_geocoding_delay_ms(),
            timeout_secs: default_geocoding_timeout(),
            sweep_interval_minutes: default_geocoding_sweep_interval(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_rate_limit() -> u32 {
    100
}
fn default_sirene_base_url() -> String {
    "https://api.insee.fr/entreprises/sirene/V3".to_string()
}
fn default_sirene_token_url() -> String {
    "https://api.insee.fr/token".to_string()
}
fn default_sirene_rate_limit() -> u32 {
    30
}
fn default_sirene_page_size() -> u32 {
    1000
}
fn default_sirene_timeout() -> u64 {
    30
}
fn default_sirene_connect_timeout() -> u64 {
    10
}
fn default_sirene_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_cap_ms() -> u64 {
    30_000
}
fn default_geocoding_enabled() -> bool {
    true
}
fn default_geocoding_base_url() -> String {
    "https://api-adresse.data.gouv.fr".to_string()
}
fn default_geocoding_chunk_size() -> u32 {
    50
}
fn default_geocoding_delay_ms() -> u64 {
    1000
}
fn default_geocoding_timeout() -> u64 {
    10
}
fn default_geocoding_sweep_interval() -> u64 {
    60
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Defaults used by `load_for_test`, mirroring config/default.toml.
const TEST_DEFAULTS: &str = r#"
    [server]
    host = "0.0.0.0"
    port = 8080
    request_timeout_secs = 30

    [database]
    url = ""
    max_connections = 20
    min_connections = 5
    connect_timeout_secs = 10
    idle_timeout_secs = 600

    [logging]
    level = "info"
    format = "json"

    [security]
    cors_origins = []
    rate_limit_per_minute = 100

    [sirene]
    base_url = "https://api.insee.fr/entreprises/sirene/V3"
    token_url = "https://api.insee.fr/token"
    rate_limit_per_minute = 30
    page_size = 1000
    timeout_secs = 30
    connect_timeout_secs = 10
    max_attempts = 3
    backoff_base_ms = 1000
    backoff_cap_ms = 30000

    [geocoding]
    enabled = false
    base_url = "https://api-adresse.data.gouv.fr"
    chunk_size = 50
    delay_ms = 1000
    timeout_secs = 10
    sweep_interval_minutes = 60
"#;

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with ANNUAIRE__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("ANNUAIRE").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Built from embedded defaults so tests do not depend on config files.
    /// Validation is skipped to allow partial configs.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(TEST_DEFAULTS, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "ANNUAIRE__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if !(1..=1000).contains(&self.sirene.page_size) {
            return Err(ConfigValidationError::InvalidValue(
                "sirene.page_size must be between 1 and 1000".to_string(),
            ));
        }

        if self.sirene.rate_limit_per_minute == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "sirene.rate_limit_per_minute must be positive".to_string(),
            ));
        }

        if self.geocoding.enabled && self.geocoding.chunk_size == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "geocoding.chunk_size must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

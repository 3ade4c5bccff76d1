//! SIRENE registry HTTP client.
//!
//! Implements [`RegistrySource`] over the INSEE `/etablissements` endpoint.
//! Every network attempt first waits on the sliding-window limiter, and each
//! page request runs under the configured retry policy.

use std::time::Duration;

use async_trait::async_trait;
use domain::models::{RegistryFilters, RegistryPage};
use domain::services::{RegistryError, RegistrySource};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use shared::{retry_with_backoff, RetryPolicy, SlidingWindowRateLimiter};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::SireneConfig;
use crate::middleware::metrics::record_registry_request;

/// Longest error body kept in [`RegistryError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// How requests are authenticated.
#[derive(Clone)]
enum SireneAuth {
    /// Static bearer key, used as is.
    ApiKey(String),
    /// Client credentials exchanged once for a bearer token.
    OAuth {
        client_id: String,
        client_secret: String,
    },
}

impl std::fmt::Debug for SireneAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SireneAuth::ApiKey(_) => f.write_str("ApiKey(..)"),
            SireneAuth::OAuth { client_id, .. } => f
                .debug_struct("OAuth")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Authenticated, rate-limited, retrying SIRENE client.
#[derive(Debug)]
pub struct SireneClient {
    client: Client,
    base_url: String,
    token_url: String,
    auth: SireneAuth,
    /// OAuth token, fetched on first use and kept for the life of the client.
    token: Mutex<Option<String>>,
    rate_limiter: SlidingWindowRateLimiter,
    retry: RetryPolicy,
    page_size: u32,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl SireneClient {
    /// Build a client from configuration.
    ///
    /// Fails with [`RegistryError::Configuration`] when neither an API key
    /// nor a complete pair of OAuth credentials is configured.
    pub fn new(config: &SireneConfig) -> Result<Self, RegistryError> {
        let auth = match (
            non_blank(&config.api_key),
            non_blank(&config.oauth_client_id),
            non_blank(&config.oauth_client_secret),
        ) {
            (Some(key), _, _) => SireneAuth::ApiKey(key),
            (None, Some(client_id), Some(client_secret)) => SireneAuth::OAuth {
                client_id,
                client_secret,
            },
            _ => {
                return Err(RegistryError::Configuration(
                    "No SIRENE authentication method configured (set sirene.api_key or \
                     sirene.oauth_client_id and sirene.oauth_client_secret)"
                        .to_string(),
                ))
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| RegistryError::Configuration(format!("HTTP client: {}", e)))?;

        info!(
            base_url = %config.base_url,
            auth = ?auth,
            rate_limit_per_minute = config.rate_limit_per_minute,
            page_size = config.page_size,
            "SIRENE client configured"
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            auth,
            token: Mutex::new(None),
            rate_limiter: SlidingWindowRateLimiter::per_minute(config.rate_limit_per_minute),
            retry: config.retry_policy(),
            page_size: config.page_size,
        })
    }

    /// Bearer token for the next request.
    async fn bearer_token(&self) -> Result<String, RegistryError> {
        let (client_id, client_secret) = match &self.auth {
            SireneAuth::ApiKey(key) => return Ok(key.clone()),
            SireneAuth::OAuth {
                client_id,
                client_secret,
            } => (client_id, client_secret),
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| RegistryError::Http(format!("token request: {}", e)))?;

        let body = Self::checked_body(response).await?;
        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| RegistryError::Decode(format!("token response: {}", e)))?;

        info!("SIRENE OAuth token obtained");
        *cached = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    /// Body of a successful response, or the matching error.
    async fn checked_body(response: reqwest::Response) -> Result<Vec<u8>, RegistryError> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RegistryError::RateLimited);
        }
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body.truncate(end);
            }
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| RegistryError::Http(format!("reading response: {}", e)))
    }

    /// One network attempt for one page.
    async fn request_page(
        &self,
        filters: &RegistryFilters,
        cursor: &str,
    ) -> Result<RegistryPage, RegistryError> {
        self.rate_limiter.acquire().await;
        let token = self.bearer_token().await?;

        let mut query: Vec<(&str, &str)> = Vec::with_capacity(filters.len() + 2);
        let page_size = self.page_size.to_string();
        query.push(("nombre", &page_size));
        query.push(("curseur", cursor));
        query.extend(filters.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let response = self
            .client
            .get(format!("{}/etablissements", self.base_url))
            .bearer_auth(token)
            .query(&query)
            .send()
            .await
            .map_err(|e| RegistryError::Http(e.to_string()))?;

        let body = Self::checked_body(response).await?;
        serde_json::from_slice(&body).map_err(|e| RegistryError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RegistrySource for SireneClient {
    async fn fetch_page(
        &self,
        filters: &RegistryFilters,
        cursor: &str,
    ) -> Result<RegistryPage, RegistryError> {
        retry_with_backoff(&self.retry, RegistryError::is_retryable, |attempt| async move {
            let result = self.request_page(filters, cursor).await;
            let outcome = match &result {
                Ok(_) => "success",
                Err(RegistryError::RateLimited) => "rate_limited",
                Err(_) => "error",
            };
            record_registry_request(outcome);
            if let Ok(page) = &result {
                debug!(
                    attempt = attempt,
                    cursor = cursor,
                    records = page.records.len(),
                    "SIRENE page fetched"
                );
            }
            result
        })
        .await
    }
}

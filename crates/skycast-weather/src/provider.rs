//! Per-endpoint wrappers over the weather HTTP API.
//!
//! Each call is routed through the shared [`RequestGovernor`], so callers get
//! caching, rate limiting and 429 retries without doing anything themselves.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

use crate::error::ApiError;
use crate::governor::{RequestGovernor, RequestOptions};
use crate::types::{CurrentResponse, ForecastResponse, SearchLocation};

pub const DEFAULT_BASE_URL: &str = "https://api.weatherapi.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub const CURRENT_ENDPOINT: &str = "/current.json";
pub const FORECAST_ENDPOINT: &str = "/forecast.json";
pub const SEARCH_ENDPOINT: &str = "/search.json";

/// Days the forecast endpoint accepts.
pub const MAX_FORECAST_DAYS: u8 = 14;

const USER_AGENT: &str = "Skycast/0.1.0";

/// Query parameters shared by every endpoint. This is also the cache key
/// payload, so the API key is deliberately not part of it.
#[derive(Debug, Clone, Serialize)]
struct LocationQuery {
    q: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    days: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct WeatherClient {
    client: Arc<Client>,
    base_url: String,
    api_key: Option<String>,
    governor: RequestGovernor,
}

impl WeatherClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        governor: RequestGovernor,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            governor,
        })
    }

    pub fn governor(&self) -> &RequestGovernor {
        &self.governor
    }

    /// Whether the shared bucket is currently out of tokens.
    pub fn is_rate_limited(&self) -> bool {
        self.governor.is_rate_limited()
    }

    /// Current conditions for a place name, postcode or "lat,lon" pair.
    ///
    /// # Errors
    /// Returns an [`ApiError`] describing the upstream failure.
    #[instrument(skip(self), level = "info")]
    pub async fn current(
        &self,
        query: &str,
        options: RequestOptions,
    ) -> Result<CurrentResponse, ApiError> {
        let params = LocationQuery {
            q: normalize_query(query)?,
            days: None,
        };
        self.get(CURRENT_ENDPOINT, params, options).await
    }

    /// Multi-day forecast; `days` is clamped to `1..=14`.
    ///
    /// # Errors
    /// Returns an [`ApiError`] describing the upstream failure.
    #[instrument(skip(self), level = "info")]
    pub async fn forecast(
        &self,
        query: &str,
        days: u8,
        options: RequestOptions,
    ) -> Result<ForecastResponse, ApiError> {
        let params = LocationQuery {
            q: normalize_query(query)?,
            days: Some(days.clamp(1, MAX_FORECAST_DAYS)),
        };
        self.get(FORECAST_ENDPOINT, params, options).await
    }

    /// Location autocomplete. Always normal priority.
    ///
    /// # Errors
    /// Returns an [`ApiError`] describing the upstream failure.
    #[instrument(skip(self), level = "info")]
    pub async fn search(&self, query: &str) -> Result<Vec<SearchLocation>, ApiError> {
        let params = LocationQuery {
            q: normalize_query(query)?,
            days: None,
        };
        self.get(SEARCH_ENDPOINT, params, RequestOptions::default())
            .await
    }

    async fn get<T>(
        &self,
        endpoint: &'static str,
        params: LocationQuery,
        options: RequestOptions,
    ) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let api_key = self.api_key.clone().ok_or_else(|| ApiError::Unauthorized {
            status: 401,
            message: "No API key configured".to_string(),
        })?;

        let client = Arc::clone(&self.client);
        let url = format!("{}{}", self.base_url, endpoint);
        let request_params = params.clone();

        let request_fn = move || {
            let client = Arc::clone(&client);
            let url = url.clone();
            let api_key = api_key.clone();
            let params = request_params.clone();
            async move { fetch_json::<T>(&client, &url, &api_key, &params).await }
        };

        self.governor
            .execute(endpoint, &params, request_fn, options)
            .await
    }
}

fn normalize_query(query: &str) -> Result<String, ApiError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(ApiError::message("Location query must not be empty"));
    }
    Ok(trimmed.to_string())
}

async fn fetch_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    api_key: &str,
    params: &LocationQuery,
) -> Result<T, ApiError> {
    let response = client
        .get(url)
        .query(&[("key", api_key)])
        .query(params)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::debug!("{} returned status {}", url, status);
        return Err(ApiError::from_status(status.as_u16(), &body));
    }

    Ok(response.json::<T>().await?)
}

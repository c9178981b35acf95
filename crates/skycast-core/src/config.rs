use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Weather API settings
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Request governor settings
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

/// Temperature unit preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Auto,
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Base URL of the weather API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// API key. Leave unset to read `WEATHER_API_KEY` at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Temperature unit preference
    #[serde(default)]
    pub temperature_unit: TemperatureUnit,

    /// Days requested from the forecast endpoint
    #[serde(default = "default_forecast_days")]
    pub forecast_days: u8,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "https://api.weatherapi.com/v1".to_string()
}

/// Environment variable consulted when no key is configured
pub const API_KEY_ENV: &str = "WEATHER_API_KEY";

fn default_forecast_days() -> u8 {
    3
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl WeatherConfig {
    /// The configured key, or `WEATHER_API_KEY` when none is set. Never
    /// written back to the config file.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key_or(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_or(&self, fallback: Option<String>) -> Option<String> {
        let usable = |k: &String| !k.trim().is_empty();
        self.api_key.clone().filter(usable).or(fallback.filter(usable))
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key: None,
            temperature_unit: TemperatureUnit::Auto,
            forecast_days: default_forecast_days(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Token bucket, retry and cache settings. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Maximum burst of requests
    pub burst_capacity: u32,
    /// Tokens restored per second
    pub refill_rate: f64,
    pub refill_interval_ms: u64,
    /// Retries after a 429 response
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// How long responses are served from cache
    pub cache_time_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            burst_capacity: 10,
            refill_rate: 1.0,
            refill_interval_ms: 1000,
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10_000,
            cache_time_ms: 5 * 60 * 1000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skycast");

        Self {
            config_dir,
            weather: WeatherConfig::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, writing defaults there if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        self.validate_with_env_key(std::env::var(API_KEY_ENV).ok())
    }

    fn validate_with_env_key(&self, env_key: Option<String>) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.weather.api_base_url, "weather.api_base_url", &mut result);

        if self.weather.api_key_or(env_key).is_none() {
            result.add_warning(
                "weather.api_key",
                "No API key configured - weather requests will fail",
            );
        }

        if self.weather.forecast_days == 0 {
            result.add_error("weather.forecast_days", "Forecast days must be at least 1");
        } else if self.weather.forecast_days > 14 {
            result.add_warning(
                "weather.forecast_days",
                "Forecast days above 14 will be capped at 14",
            );
        }

        if self.weather.request_timeout_secs == 0 {
            result.add_error(
                "weather.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        }

        let rl = &self.rate_limit;
        if rl.burst_capacity == 0 {
            result.add_error(
                "rate_limit.burst_capacity",
                "Burst capacity must be at least 1",
            );
        }

        if !(rl.refill_rate.is_finite() && rl.refill_rate > 0.0) {
            result.add_error(
                "rate_limit.refill_rate",
                "Refill rate must be a positive number of tokens per second",
            );
        }

        if rl.refill_interval_ms == 0 {
            result.add_error(
                "rate_limit.refill_interval_ms",
                "Refill interval must be greater than 0",
            );
        }

        if rl.initial_backoff_ms > rl.max_backoff_ms {
            result.add_warning(
                "rate_limit.initial_backoff_ms",
                "Initial backoff exceeds max backoff; every retry will wait the maximum",
            );
        }

        if rl.cache_time_ms == 0 {
            result.add_warning("rate_limit.cache_time_ms", "Response caching disabled");
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("skycast");

        Ok(config_dir.join("config.toml"))
    }
}

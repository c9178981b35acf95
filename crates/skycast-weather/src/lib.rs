//! Weather service for Skycast
//!
//! Provides current conditions, forecasts and location search against a
//! rate-limited weather API. All traffic goes through a [`RequestGovernor`]
//! that caches responses, enforces a token-bucket budget and retries 429s.

pub mod error;
pub mod governor;
pub mod provider;
pub mod types;

pub use error::ApiError;
pub use governor::{
    Clock, GovernorStats, ManualClock, MonotonicClock, Priority, RateLimitConfig,
    RequestGovernor, RequestOptions,
};
pub use provider::WeatherClient;
pub use types::*;

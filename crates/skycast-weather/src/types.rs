use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Temperature unit preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Auto,
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Pick the reading in this unit. `Auto` resolves to Celsius.
    pub fn pick(&self, celsius: f64, fahrenheit: f64) -> f64 {
        match self {
            Self::Fahrenheit => fahrenheit,
            Self::Auto | Self::Celsius => celsius,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Fahrenheit => "°F",
            Self::Auto | Self::Celsius => "°C",
        }
    }
}

/// Weather condition categories mapped from provider condition codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
}

impl WeatherCondition {
    /// Convert a provider condition code to a WeatherCondition
    /// See: https://www.weatherapi.com/docs/weather_conditions.json
    pub fn from_condition_code(code: i32) -> Self {
        match code {
            1000 => Self::Clear,
            1003 => Self::PartlyCloudy,
            1006 | 1009 => Self::Cloudy,
            1030 | 1135 | 1147 => Self::Fog,
            1150 | 1153 => Self::Drizzle,
            1063 | 1180 | 1183 | 1186 | 1189 | 1240 => Self::Rain,
            1192 | 1195 | 1243 | 1246 => Self::HeavyRain,
            1066 | 1114 | 1117 | 1210 | 1213 | 1216 | 1219 | 1222 | 1225 | 1255 | 1258 => {
                Self::Snow
            }
            1069 | 1072 | 1168 | 1171 | 1198 | 1201 | 1204 | 1207 | 1237 | 1249 | 1252
            | 1261 | 1264 => Self::Sleet, // Freezing drizzle/rain, ice pellets
            1087 | 1273 | 1276 | 1279 | 1282 => Self::Thunderstorm,
            _ => Self::Clear, // Unknown codes default to clear
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::PartlyCloudy => "Partly Cloudy",
            Self::Cloudy => "Cloudy",
            Self::Fog => "Fog",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::HeavyRain => "Heavy Rain",
            Self::Snow => "Snow",
            Self::Sleet => "Sleet",
            Self::Thunderstorm => "Thunderstorm",
        }
    }

    pub fn icon_name(&self) -> &'static str {
        match self {
            Self::Clear => "sun",
            Self::PartlyCloudy => "cloud_sun",
            Self::Cloudy => "cloud",
            Self::Fog => "cloud_fog",
            Self::Drizzle | Self::Rain | Self::HeavyRain => "cloud_rain",
            Self::Snow | Self::Sleet => "cloud_snow",
            Self::Thunderstorm => "cloud_lightning",
        }
    }
}

/// Condition block as sent by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Condition {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub code: i32,
}

impl Condition {
    pub fn category(&self) -> WeatherCondition {
        WeatherCondition::from_condition_code(self.code)
    }
}

/// Resolved location attached to current/forecast responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub tz_id: Option<String>,
    #[serde(default)]
    pub localtime: Option<String>,
}

impl Location {
    /// "Name, Region" or "Name, Country" when the region is blank.
    pub fn display_name(&self) -> String {
        let suffix = if !self.region.is_empty() && self.region != self.name {
            Some(self.region.as_str())
        } else if !self.country.is_empty() && self.country != self.name {
            Some(self.country.as_str())
        } else {
            None
        };

        match suffix {
            Some(s) => format!("{}, {}", self.name, s),
            None => self.name.clone(),
        }
    }
}

/// Current conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temp_c: f64,
    pub temp_f: f64,
    #[serde(default)]
    pub feelslike_c: f64,
    #[serde(default)]
    pub feelslike_f: f64,
    #[serde(default)]
    pub humidity: u8,
    #[serde(default)]
    pub wind_kph: f64,
    #[serde(default)]
    pub is_day: u8,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub last_updated_epoch: Option<i64>,
}

impl CurrentConditions {
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated_epoch
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Response of the current-conditions endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentResponse {
    pub location: Location,
    pub current: CurrentConditions,
}

/// Daily aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub maxtemp_c: f64,
    pub maxtemp_f: f64,
    pub mintemp_c: f64,
    pub mintemp_f: f64,
    #[serde(default)]
    pub daily_chance_of_rain: u8,
    #[serde(default)]
    pub condition: Condition,
}

/// Sunrise/sunset, as local "hh:mm AM" strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Astro {
    #[serde(default)]
    pub sunrise: String,
    #[serde(default)]
    pub sunset: String,
}

/// Hourly forecast entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourForecast {
    pub time_epoch: i64,
    pub temp_c: f64,
    pub temp_f: f64,
    #[serde(default)]
    pub chance_of_rain: u8,
    #[serde(default)]
    pub condition: Condition,
}

impl HourForecast {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time_epoch, 0)
    }
}

/// Daily forecast entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub day: DaySummary,
    #[serde(default)]
    pub astro: Astro,
    #[serde(default)]
    pub hour: Vec<HourForecast>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Forecast {
    #[serde(default)]
    pub forecastday: Vec<ForecastDay>,
}

/// Response of the forecast endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub location: Location,
    pub current: CurrentConditions,
    #[serde(default)]
    pub forecast: Forecast,
}

impl ForecastResponse {
    pub fn days(&self) -> &[ForecastDay] {
        &self.forecast.forecastday
    }
}

/// Location search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchLocation {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub url: Option<String>,
}

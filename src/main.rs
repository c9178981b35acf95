use std::time::Duration;

use anyhow::Result;
use skycast_core::{Config, RateLimitSettings};
use skycast_weather::{
    ApiError, CurrentResponse, ForecastResponse, RateLimitConfig, RequestGovernor,
    RequestOptions, TemperatureUnit, WeatherClient,
};

const USAGE: &str = "usage: skycast <location>\n       skycast search <query>";

enum Command {
    Show(String),
    Search(String),
}

fn parse_args(args: &[String]) -> Option<Command> {
    match args {
        [cmd, rest @ ..] if cmd == "search" && !rest.is_empty() => {
            Some(Command::Search(rest.join(" ")))
        }
        [] => None,
        location => Some(Command::Show(location.join(" "))),
    }
}

fn rate_limit_config(settings: &RateLimitSettings) -> RateLimitConfig {
    RateLimitConfig {
        burst_capacity: settings.burst_capacity,
        refill_rate: settings.refill_rate,
        refill_interval: Duration::from_millis(settings.refill_interval_ms),
        max_retries: settings.max_retries,
        initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
        max_backoff: Duration::from_millis(settings.max_backoff_ms),
        cache_time: Duration::from_millis(settings.cache_time_ms),
    }
}

fn temperature_unit(unit: skycast_core::TemperatureUnit) -> TemperatureUnit {
    match unit {
        skycast_core::TemperatureUnit::Auto => TemperatureUnit::Auto,
        skycast_core::TemperatureUnit::Celsius => TemperatureUnit::Celsius,
        skycast_core::TemperatureUnit::Fahrenheit => TemperatureUnit::Fahrenheit,
    }
}

fn print_current(weather: &CurrentResponse, unit: TemperatureUnit) {
    let now = &weather.current;
    println!("{}", weather.location.display_name());
    println!(
        "  {:.0}{} (feels like {:.0}{}), {}",
        unit.pick(now.temp_c, now.temp_f),
        unit.symbol(),
        unit.pick(now.feelslike_c, now.feelslike_f),
        unit.symbol(),
        now.condition.category().description(),
    );
    println!("  Humidity {}%, wind {:.0} km/h", now.humidity, now.wind_kph);
}

fn print_forecast(forecast: &ForecastResponse, unit: TemperatureUnit) {
    for day in forecast.days() {
        println!(
            "  {}  {:>4.0}{} / {:>4.0}{}  {}% rain  {}",
            day.date.format("%a %d %b"),
            unit.pick(day.day.maxtemp_c, day.day.maxtemp_f),
            unit.symbol(),
            unit.pick(day.day.mintemp_c, day.day.mintemp_f),
            unit.symbol(),
            day.day.daily_chance_of_rain,
            day.day.condition.category().description(),
        );
    }
}

async fn run(client: &WeatherClient, command: Command, config: &Config) -> Result<(), ApiError> {
    let unit = temperature_unit(config.weather.temperature_unit);

    match command {
        Command::Search(query) => {
            let results = client.search(&query).await?;
            if results.is_empty() {
                println!("No locations match \"{}\"", query);
            }
            for place in results {
                println!(
                    "{}, {}, {} ({:.2}, {:.2})",
                    place.name, place.region, place.country, place.lat, place.lon
                );
            }
        }
        Command::Show(location) => {
            // Current conditions first; the forecast can wait its turn.
            let current = client
                .current(&location, RequestOptions::high_priority())
                .await?;
            print_current(&current, unit);

            let forecast = client
                .forecast(&location, config.weather.forecast_days, RequestOptions::default())
                .await?;
            print_forecast(&forecast, unit);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    skycast_core::init()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = parse_args(&args) else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let (config, _warnings) = Config::load_validated()?;

    let governor = RequestGovernor::new(rate_limit_config(&config.rate_limit));
    let client = WeatherClient::new(
        &config.weather.api_base_url,
        config.weather.resolved_api_key(),
        Duration::from_secs(config.weather.request_timeout_secs),
        governor.clone(),
    )?;

    tracing::info!("Skycast started");

    let outcome = run(&client, command, &config).await;

    let stats = governor.stats();
    tracing::debug!(
        "Governor: {:.1} tokens, {} queued, {} cached",
        stats.available_tokens,
        stats.queued_requests,
        stats.cached_entries
    );
    governor.shutdown();

    if let Err(e) = outcome {
        tracing::error!("Request failed: {}", e);
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }

    Ok(())
}

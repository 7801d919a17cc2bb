/// Open-Meteo hourly weather forecast
///
/// Pulls a 16-day hourly forecast for the lake centroid and applies the
/// linear bias corrections fitted against lake-station observations.
///
/// The corrections were fitted to the ECMWF IFS product: precipitation in
/// metres and downward shortwave radiation in J/m², both accumulated over a
/// 3-hour forecast step. Hourly Open-Meteo values (mm, mean W/m²) are
/// summed to those steps and converted before correcting, so every row of
/// the file is one IFS step.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use super::{send_text, FetchError};
use crate::model::Location;

pub const HOURLY_VARIABLES: &str = "precipitation,wind_speed_10m,shortwave_radiation,evapotranspiration";

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    hourly: HourlyBlock,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    #[serde(default)]
    precipitation: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    shortwave_radiation: Vec<Option<f64>>,
    #[serde(default)]
    evapotranspiration: Vec<Option<f64>>,
}

/// Hours per IFS forecast step.
pub const STEP_HOURS: usize = 3;

const SECONDS_PER_HOUR: f64 = 3600.0;
const MM_PER_M: f64 = 1000.0;

/// One forecast step, raw and corrected. `tp` is metres and `ssrd` J/m²
/// over the step ending at `datetime`; wind and evapotranspiration are the
/// hourly values at `datetime`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRow {
    #[serde(serialize_with = "serialize_datetime")]
    pub datetime: NaiveDateTime,
    pub tp: Option<f64>,
    pub tp_corrected: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_speed_corrected: Option<f64>,
    pub ssrd: Option<f64>,
    pub ssrd_corrected: Option<f64>,
    pub evapotranspiration: Option<f64>,
}

fn serialize_datetime<S: serde::Serializer>(dt: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

// ============================================================================
// Unit conversion and bias corrections
// ============================================================================

/// Total of hourly precipitation (mm) over a step, in metres. Missing if
/// any hour is missing.
pub fn precipitation_m(hourly_mm: &[Option<f64>]) -> Option<f64> {
    hourly_mm.iter().copied().sum::<Option<f64>>().map(|mm| mm / MM_PER_M)
}

/// Energy delivered by hourly mean irradiance (W/m²) over a step, in J/m².
pub fn radiation_j_per_m2(hourly_w_per_m2: &[Option<f64>]) -> Option<f64> {
    hourly_w_per_m2
        .iter()
        .copied()
        .sum::<Option<f64>>()
        .map(|w| w * SECONDS_PER_HOUR)
}

pub fn correct_rainfall(forecast: f64) -> f64 {
    0.7247 * forecast + 0.1853
}

pub fn correct_wind_speed(forecast: f64) -> f64 {
    0.4167 * forecast + 4.1868
}

pub fn correct_radiation(forecast: f64) -> f64 {
    0.0553 * forecast - 0.0081
}

// ============================================================================
// Request / response
// ============================================================================

pub fn build_forecast_url(base_url: &str, location: Location, forecast_days: u32) -> String {
    format!(
        "{}?latitude={}&longitude={}&hourly={}&forecast_days={}&wind_speed_unit=ms&timezone=GMT",
        base_url, location.latitude, location.longitude, HOURLY_VARIABLES, forecast_days
    )
}

pub fn parse_forecast_response(body: &str) -> Result<Vec<ForecastRow>, FetchError> {
    let response: ForecastResponse = serde_json::from_str(body)?;
    let hourly = response.hourly;
    let at = |v: &[Option<f64>], i: usize| v.get(i).copied().flatten();

    let mut rows = Vec::with_capacity(hourly.time.len() / STEP_HOURS + 1);
    for (i, raw) in hourly.time.iter().enumerate() {
        let datetime = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
            .map_err(|e| FetchError::Parse(format!("bad forecast time '{}': {}", raw, e)))?;
        if datetime.hour() as usize % STEP_HOURS != 0 {
            continue;
        }

        // Open-Meteo hourly sums and means cover the hour ending at their
        // timestamp; the first step may have fewer hours behind it.
        let window = i.saturating_sub(STEP_HOURS - 1)..i + 1;
        let step = |v: &[Option<f64>]| -> Vec<Option<f64>> { window.clone().map(|j| at(v, j)).collect() };

        let tp = precipitation_m(&step(&hourly.precipitation));
        let ssrd = radiation_j_per_m2(&step(&hourly.shortwave_radiation));
        let wind_speed = at(&hourly.wind_speed_10m, i);
        rows.push(ForecastRow {
            datetime,
            tp,
            tp_corrected: tp.map(correct_rainfall),
            wind_speed,
            wind_speed_corrected: wind_speed.map(correct_wind_speed),
            ssrd,
            ssrd_corrected: ssrd.map(correct_radiation),
            evapotranspiration: at(&hourly.evapotranspiration, i),
        });
    }

    if rows.is_empty() {
        return Err(FetchError::NoData("weather forecast".to_string()));
    }
    Ok(rows)
}

pub fn fetch_forecast(
    client: &reqwest::blocking::Client,
    base_url: &str,
    location: Location,
    forecast_days: u32,
) -> Result<Vec<ForecastRow>, FetchError> {
    let body = send_text(client.get(build_forecast_url(base_url, location, forecast_days)))?;
    parse_forecast_response(&body)
}

/// Writes the forecast rows as CSV.
pub fn write_forecast<W: std::io::Write>(writer: W, rows: &[ForecastRow]) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

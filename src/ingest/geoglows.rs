//! GEOGLOWS streamflow forecast client.
//!
//! Looks up the river reach nearest a station and downloads its 15-day
//! ensemble forecast and forecast statistics, then reduces the 3-hourly
//! m³/s values to the daily m³/d layout the model reads.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{send_text, FetchError};
use crate::model::{CUBIC_METERS_PER_ACRE_FOOT, HOURS_IN_DAY, SECONDS_IN_HOUR};
use crate::store::TimeSeries;

/// Ensemble member that is actually the high-resolution run.
pub const HIGH_RES_ENSEMBLE: &str = "ensemble_52_m^3/s";
pub const HIGH_RES_STAT: &str = "high_res_m^3/s";

const TIME_KEYS: &[&str] = &["datetime", "datetime_utc", "time"];

/// A forecast as returned by the service: timestamps plus value columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastTable {
    pub times: Vec<NaiveDateTime>,
    pub columns: Vec<(String, Vec<Option<f64>>)>,
}

#[derive(Debug, Deserialize)]
struct ReachResponse {
    #[serde(default)]
    reach_id: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

// ============================================================================
// URLs
// ============================================================================

pub fn build_reach_id_url(base_url: &str, latitude: f64, longitude: f64) -> String {
    format!(
        "{}/GetReachID/?lat={}&long={}&return_format=json",
        base_url, latitude, longitude
    )
}

pub fn build_ensembles_url(base_url: &str, reach_id: u64, forecast_date: NaiveDate) -> String {
    format!(
        "{}/ForecastEnsembles/?reach_id={}&date={}&return_format=json",
        base_url,
        reach_id,
        forecast_date.format("%Y%m%d")
    )
}

pub fn build_stats_url(base_url: &str, reach_id: u64, forecast_date: NaiveDate) -> String {
    format!(
        "{}/ForecastStats/?reach_id={}&date={}&return_format=json",
        base_url,
        reach_id,
        forecast_date.format("%Y%m%d")
    )
}

// ============================================================================
// Parsing
// ============================================================================

pub fn parse_reach_id(body: &str) -> Result<u64, FetchError> {
    let response: ReachResponse = serde_json::from_str(body)?;
    if let Some(error) = response.error {
        return Err(FetchError::NoData(error));
    }
    response
        .reach_id
        .ok_or_else(|| FetchError::Parse("response has no reach_id".to_string()))
}

fn parse_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%z").ok())
}

/// Parses a column-oriented forecast: one time array plus one array per
/// series. The table may sit at the top level or under `time_series`.
/// Columns whose length differs from the time axis (the separately-timed
/// high-resolution run) are dropped. Column names gain an `_m^3/s` suffix
/// when the service omits units.
pub fn parse_forecast_table(body: &str) -> Result<ForecastTable, FetchError> {
    let root: serde_json::Value = serde_json::from_str(body)?;
    let table = root
        .get("time_series")
        .filter(|v| v.is_object())
        .unwrap_or(&root)
        .as_object()
        .ok_or_else(|| FetchError::Parse("forecast is not an object".to_string()))?;

    let (time_key, raw_times) = TIME_KEYS
        .iter()
        .find_map(|k| table.get(*k).and_then(|v| v.as_array()).map(|a| (*k, a)))
        .ok_or_else(|| FetchError::Parse("forecast has no datetime column".to_string()))?;

    let times = raw_times
        .iter()
        .map(|t| {
            t.as_str()
                .and_then(parse_time)
                .ok_or_else(|| FetchError::Parse(format!("bad forecast time {}", t)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut columns = Vec::new();
    for (name, values) in table {
        if name == time_key {
            continue;
        }
        let Some(values) = values.as_array() else {
            continue;
        };
        if values.len() != times.len() {
            continue;
        }
        let name = if name.ends_with("m^3/s") {
            name.clone()
        } else {
            format!("{}_m^3/s", name)
        };
        columns.push((name, values.iter().map(|v| v.as_f64()).collect()));
    }
    columns.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(ForecastTable { times, columns })
}

// ============================================================================
// Daily reduction
// ============================================================================

enum Reduce {
    Mean,
    Max,
    Min,
}

/// Drops `excluded` columns and any time step with a missing value, converts
/// m³/s to m³/h and clips negatives to zero. Returns the surviving column
/// names and the per-day groups of cleaned rows.
fn clean_hourly(
    table: &ForecastTable,
    excluded: &str,
) -> (Vec<String>, BTreeMap<NaiveDate, Vec<Vec<f64>>>) {
    let kept: Vec<&(String, Vec<Option<f64>>)> =
        table.columns.iter().filter(|(name, _)| name != excluded).collect();

    let mut days: BTreeMap<NaiveDate, Vec<Vec<f64>>> = BTreeMap::new();
    for (i, time) in table.times.iter().enumerate() {
        let row: Option<Vec<f64>> = kept.iter().map(|(_, values)| values[i]).collect();
        let Some(row) = row else {
            continue;
        };
        let row: Vec<f64> = row.into_iter().map(|v| (v * SECONDS_IN_HOUR).max(0.0)).collect();
        days.entry(time.date()).or_default().push(row);
    }

    (kept.iter().map(|(name, _)| name.clone()).collect(), days)
}

fn reduce(rows: &[Vec<f64>], column: usize, how: &Reduce) -> f64 {
    let values = rows.iter().map(|r| r[column]);
    match how {
        Reduce::Mean => values.sum::<f64>() / rows.len() as f64,
        Reduce::Max => values.fold(f64::NEG_INFINITY, f64::max),
        Reduce::Min => values.fold(f64::INFINITY, f64::min),
    }
}

fn daily_name(name: &str) -> String {
    name.replace("m^3/s", "m^3/d")
}

/// Daily m³/d series for every ensemble member except the high-resolution
/// one: the mean hourly volume of the day times 24.
pub fn format_ensembles(table: &ForecastTable) -> TimeSeries {
    let (names, days) = clean_hourly(table, HIGH_RES_ENSEMBLE);
    let mut series = TimeSeries::new(names.iter().map(|n| daily_name(n)));
    for (date, rows) in &days {
        let values = (0..names.len())
            .map(|c| Some(reduce(rows, c, &Reduce::Mean) * HOURS_IN_DAY))
            .collect();
        series.push(*date, values);
    }
    series
}

/// Daily m³/d forecast statistics: daily max of `flow_max`, daily min of
/// `flow_min`, daily mean of everything else.
pub fn format_stats(table: &ForecastTable) -> TimeSeries {
    let (names, days) = clean_hourly(table, HIGH_RES_STAT);
    let how: Vec<Reduce> = names
        .iter()
        .map(|n| {
            if n.starts_with("flow_max") {
                Reduce::Max
            } else if n.starts_with("flow_min") {
                Reduce::Min
            } else {
                Reduce::Mean
            }
        })
        .collect();

    let mut series = TimeSeries::new(names.iter().map(|n| daily_name(n)));
    for (date, rows) in &days {
        let values = how
            .iter()
            .enumerate()
            .map(|(c, h)| Some(reduce(rows, c, h) * HOURS_IN_DAY))
            .collect();
        series.push(*date, values);
    }
    series
}

/// The `<station>_FLOW_cmd_geoglows.csv` layout: ensemble columns followed
/// by stats columns, joined on date. Stats missing for a day stay empty.
pub fn ensembles_with_stats(ensembles: &ForecastTable, stats: &ForecastTable) -> TimeSeries {
    let mut combined = format_ensembles(ensembles);
    let stats = format_stats(stats);
    for column in &stats.columns {
        let Some(idx) = stats.column_index(column) else {
            continue;
        };
        let by_date: BTreeMap<NaiveDate, Option<f64>> =
            stats.rows.iter().map(|r| (r.date, r.values[idx])).collect();
        let values = combined
            .rows
            .iter()
            .map(|r| by_date.get(&r.date).copied().flatten())
            .collect();
        combined.set_column(column, values);
    }
    combined
}

/// Net inflow in acre-feet per day for one ensemble member, summed over the
/// given reach forecasts. Dates follow the first reach; a reach without a
/// value for a date contributes nothing to it.
pub fn netflows(reaches: &[TimeSeries], ensemble: u32) -> Result<TimeSeries, FetchError> {
    let column = format!("ensemble_{:02}_m^3/d", ensemble);
    let first = reaches
        .first()
        .ok_or_else(|| FetchError::NoData("inflow reaches".to_string()))?;

    let mut totals: BTreeMap<NaiveDate, f64> = first.rows.iter().map(|r| (r.date, 0.0)).collect();
    for reach in reaches {
        let idx = reach
            .column_index(&column)
            .ok_or_else(|| FetchError::Parse(format!("inflow forecast has no '{}' column", column)))?;
        for row in &reach.rows {
            if let (Some(total), Some(value)) = (totals.get_mut(&row.date), row.values[idx]) {
                *total += value;
            }
        }
    }

    let mut series = TimeSeries::new(["Netflows_acft"]);
    for (date, total) in totals {
        series.push(date, vec![Some(total / CUBIC_METERS_PER_ACRE_FOOT)]);
    }
    Ok(series)
}

// ============================================================================
// HTTP
// ============================================================================

pub fn fetch_reach_id(
    client: &reqwest::blocking::Client,
    base_url: &str,
    latitude: f64,
    longitude: f64,
) -> Result<u64, FetchError> {
    let body = send_text(client.get(build_reach_id_url(base_url, latitude, longitude)))?;
    parse_reach_id(&body)
}

pub fn fetch_ensembles(
    client: &reqwest::blocking::Client,
    base_url: &str,
    reach_id: u64,
    forecast_date: NaiveDate,
) -> Result<ForecastTable, FetchError> {
    let body = send_text(client.get(build_ensembles_url(base_url, reach_id, forecast_date)))?;
    parse_forecast_table(&body)
}

pub fn fetch_stats(
    client: &reqwest::blocking::Client,
    base_url: &str,
    reach_id: u64,
    forecast_date: NaiveDate,
) -> Result<ForecastTable, FetchError> {
    let body = send_text(client.get(build_stats_url(base_url, reach_id, forecast_date)))?;
    parse_forecast_table(&body)
}

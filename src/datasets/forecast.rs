//! Forecast products: GEOGLOWS flow ensembles, lake net inflow, and the
//! Open-Meteo weather forecast.
//!
//! Forecasts are replaced wholesale on every run rather than synced; a
//! failed refresh leaves the previous file in place.

use chrono::{Days, NaiveDate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::Context;
use crate::ingest::{geoglows, open_meteo, FetchError};
use crate::ingest::dbhydro;
use crate::logging::{self, DataSource};
use crate::report::{BatchReport, RunResult};
use crate::store::{self, StoreError, TimeSeries, DEFAULT_DATE_COLUMN};
use crate::sync::{SyncError, SyncFailure, SyncOutcome};

pub const NETFLOWS_FILE: &str = "Netflows_acft_geoglows.csv";

/// GEOGLOWS publishes with a lag; two days back is the newest forecast
/// reliably available.
pub fn default_forecast_date(today: NaiveDate) -> NaiveDate {
    today.checked_sub_days(Days::new(2)).unwrap_or(today)
}

pub fn station_file_name(station: &str) -> String {
    format!("{}_FLOW_cmd_geoglows.csv", station)
}

pub fn inflow_file_name(reach_id: u64) -> String {
    format!("{}_INFLOW_cmd_geoglows.csv", reach_id)
}

#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("ensemble must be between 1 and 51, got {0}")]
    Ensemble(u32),
    #[error("could not write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ---------------------------------------------------------------------------
// Flow forecasts
// ---------------------------------------------------------------------------

/// Downloads one reach's ensembles and stats and replaces `path` with the
/// daily table.
fn refresh_reach(ctx: &Context, reach_id: u64, forecast_date: NaiveDate, path: &Path) -> Result<SyncOutcome, SyncError> {
    let label = reach_id.to_string();
    let ensembles = ctx
        .retry(DataSource::Geoglows, &label, || {
            geoglows::fetch_ensembles(&ctx.client, &ctx.endpoints.geoglows, reach_id, forecast_date)
        })
        .map_err(SyncError::Fetch)?;
    let stats = ctx
        .retry(DataSource::Geoglows, &label, || {
            geoglows::fetch_stats(&ctx.client, &ctx.endpoints.geoglows, reach_id, forecast_date)
        })
        .map_err(SyncError::Fetch)?;

    let series = geoglows::ensembles_with_stats(&ensembles, &stats);
    let (Some(first), Some(last)) = (series.first_date(), series.last_date()) else {
        return Err(SyncError::NoNewData {
            key: label,
            after: None,
        });
    };
    store::write_atomic(path, &series)?;
    Ok(SyncOutcome::Created {
        rows: series.len(),
        first,
        last,
    })
}

fn reach_for_station(ctx: &Context, station: &str) -> Result<u64, FetchError> {
    let location = ctx.retry(DataSource::Dbhydro, station, || {
        dbhydro::fetch_station_location(&ctx.client, &ctx.endpoints.site_station, station)
    })?;
    ctx.retry(DataSource::Geoglows, station, || {
        geoglows::fetch_reach_id(&ctx.client, &ctx.endpoints.geoglows, location.latitude, location.longitude)
    })
}

fn record(report: &mut BatchReport, path: &Path, file: &str, result: Result<SyncOutcome, SyncError>) {
    let result = result.map_err(|error| SyncFailure {
        error,
        existing: path.exists(),
    });
    report.record(file, result);
}

/// Refreshes the forecast for every configured structure and inflow reach.
pub fn forecast_flows(ctx: &Context, forecast_date: Option<NaiveDate>) -> RunResult {
    let forecast_date = forecast_date.unwrap_or_else(|| default_forecast_date(ctx.today));
    let mut report = BatchReport::new("flow forecast data", DataSource::Geoglows);
    logging::info(
        DataSource::Geoglows,
        None,
        &format!("Using forecasts issued {}", forecast_date),
    );

    for station in &ctx.registry.forecast.flow_stations {
        let file = station_file_name(station);
        let path = ctx.path(&file);
        let result = reach_for_station(ctx, station)
            .map_err(SyncError::Fetch)
            .and_then(|reach_id| refresh_reach(ctx, reach_id, forecast_date, &path));
        record(&mut report, &path, &file, result);
    }

    for &reach_id in &ctx.registry.forecast.inflow_reach_ids {
        let file = inflow_file_name(reach_id);
        let path = ctx.path(&file);
        let result = refresh_reach(ctx, reach_id, forecast_date, &path);
        record(&mut report, &path, &file, result);
    }

    report.finish()
}

// ---------------------------------------------------------------------------
// Net inflow
// ---------------------------------------------------------------------------

/// Sums one ensemble member over the inflow reach files in `input_dir` and
/// writes `Netflows_acft_geoglows.csv` to `output_dir`.
pub fn netflows(input_dir: &Path, output_dir: &Path, ensemble: u32, reach_ids: &[u64]) -> Result<PathBuf, ForecastError> {
    if !(1..=51).contains(&ensemble) {
        return Err(ForecastError::Ensemble(ensemble));
    }

    let reaches = reach_ids
        .iter()
        .map(|id| store::read(&input_dir.join(inflow_file_name(*id)), DEFAULT_DATE_COLUMN))
        .collect::<Result<Vec<TimeSeries>, StoreError>>()?;
    let series = geoglows::netflows(&reaches, ensemble)?;

    fs::create_dir_all(output_dir).map_err(|source| ForecastError::Write {
        path: output_dir.to_path_buf(),
        source,
    })?;
    let path = output_dir.join(NETFLOWS_FILE);
    store::write_atomic(&path, &series)?;
    Ok(path)
}

pub fn run_netflows(input_dir: &Path, output_dir: &Path, ensemble: u32, reach_ids: &[u64]) -> RunResult {
    match netflows(input_dir, output_dir, ensemble, reach_ids) {
        Ok(path) => {
            logging::info(DataSource::File, Some(NETFLOWS_FILE), &format!("wrote {}", path.display()));
            RunResult::Success("Completed net inflow forecast.".to_string())
        }
        Err(e) => {
            logging::error(DataSource::File, Some(NETFLOWS_FILE), &e.to_string());
            RunResult::Error(format!("Could not compute net inflows: {}", e))
        }
    }
}

// ---------------------------------------------------------------------------
// Weather forecast
// ---------------------------------------------------------------------------

/// Writes the bias-corrected 3-hourly forecast for the lake centroid to `path`.
pub fn weather_forecast(ctx: &Context, path: &Path) -> Result<usize, ForecastError> {
    let forecast = &ctx.registry.forecast;
    let rows = ctx.retry(DataSource::OpenMeteo, "weather forecast", || {
        open_meteo::fetch_forecast(
            &ctx.client,
            &ctx.endpoints.open_meteo,
            forecast.lake_centroid,
            forecast.forecast_days,
        )
    })?;

    store::write_atomic_with(path, |w| open_meteo::write_forecast(w, &rows))?;
    Ok(rows.len())
}

pub fn run_weather_forecast(ctx: &Context, path: &Path) -> RunResult {
    match weather_forecast(ctx, path) {
        Ok(rows) => {
            logging::info(
                DataSource::OpenMeteo,
                None,
                &format!("wrote {} forecast steps to {}", rows, path.display()),
            );
            RunResult::Success("Completed weather forecast download.".to_string())
        }
        Err(e) => {
            logging::error(DataSource::OpenMeteo, None, &e.to_string());
            RunResult::Error(format!("Could not download the weather forecast: {}", e))
        }
    }
}

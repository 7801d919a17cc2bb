//! Daily weather at the in-lake platforms.
//!
//! One file per station and parameter, named with the parameter's units
//! (`L001_RAIN_Inches.csv`, `L001_RADP.csv`, ...). Rainfall and
//! evapotranspiration are then averaged across the platforms into the
//! lake-wide files the model reads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{daily_series, group_by_dbkey, station_of, Context};
use crate::ingest::dbhydro::{self, PeriodOfRecord};
use crate::ingest::FetchError;
use crate::logging::{self, DataSource};
use crate::model::Datum;
use crate::report::{BatchReport, RunResult};
use crate::stations::weather_units;
use crate::store::{self, StoreError, TimeSeries, DEFAULT_DATE_COLUMN};
use crate::sync::{sync, SyncFailure, SyncOutcome, SyncTarget};

pub fn column_name(station: &str, parameter: &str) -> Option<String> {
    let units = weather_units(parameter)?;
    Some(format!("{}_{}_{}", station, parameter, units.header))
}

pub fn file_name(station: &str, parameter: &str) -> Option<String> {
    let units = weather_units(parameter)?;
    if units.file.is_empty() {
        Some(format!("{}_{}.csv", station, parameter))
    } else {
        Some(format!("{}_{}_{}.csv", station, parameter, units.file))
    }
}

/// Lake-wide average file and column for a parameter, if it has one.
pub fn average_output(parameter: &str) -> Option<(&'static str, &'static str)> {
    match parameter {
        "RAIN" => Some(("LAKE_RAINFALL_DATA.csv", "average_rainfall")),
        "ETPI" => Some(("LOONE_AVERAGE_ETPI_DATA.csv", "average_ETPI")),
        _ => None,
    }
}

/// A station's daily series for one parameter.
#[derive(Debug, Clone)]
pub struct StationSeries {
    pub station: String,
    pub dbkey: String,
    pub periods: Vec<PeriodOfRecord>,
}

/// Chooses one series per station from catalogue entries, first dbkey
/// wins. With `only` set, stations outside it are ignored.
fn pick_series(
    metadata: BTreeMap<String, Vec<PeriodOfRecord>>,
    only: Option<&[String]>,
) -> BTreeMap<String, StationSeries> {
    let mut picked = BTreeMap::new();
    for (dbkey, periods) in metadata {
        let Some(station) = station_of(&periods) else {
            continue;
        };
        if only.is_some_and(|stations| !stations.contains(&station)) {
            continue;
        }
        picked.entry(station.clone()).or_insert(StationSeries {
            station,
            dbkey,
            periods,
        });
    }
    picked
}

/// Series for `parameter`: from its configured dbkeys when there are any,
/// otherwise from the catalogue entries at the configured stations.
pub fn resolve_series(ctx: &Context, parameter: &str) -> Result<BTreeMap<String, StationSeries>, FetchError> {
    let weather = &ctx.registry.weather;
    if let Some(dbkeys) = weather.dbkeys.get(parameter) {
        let dbkeys: Vec<&str> = dbkeys.iter().map(String::as_str).collect();
        return Ok(pick_series(ctx.series_metadata(&dbkeys)?, None));
    }

    let stations: Vec<&str> = weather.stations.iter().map(String::as_str).collect();
    let periods = ctx.retry(DataSource::Dbhydro, parameter, || {
        dbhydro::fetch_station_series(&ctx.client, &ctx.endpoints.dbhydro, &stations, parameter)
    })?;
    Ok(pick_series(group_by_dbkey(periods), Some(weather.stations.as_slice())))
}

pub fn sync_station(ctx: &Context, parameter: &str, series: &StationSeries) -> Result<SyncOutcome, SyncFailure> {
    let column = column_name(&series.station, parameter).unwrap_or_default();
    let file = file_name(&series.station, parameter).unwrap_or_default();
    let target = SyncTarget::new(
        format!("{} / {}", series.station, parameter),
        ctx.path(&file),
        ctx.registry.weather.date_min,
        ctx.today,
    );

    sync(
        &target,
        |date_min, date_max| {
            let values = ctx.retry(DataSource::Dbhydro, &column, || {
                dbhydro::fetch_daily(
                    &ctx.client,
                    &ctx.endpoints.dbhydro,
                    &[series.dbkey.as_str()],
                    date_min,
                    date_max,
                    Datum::Ngvd29,
                )
            })?;
            Ok(daily_series(&values, &column, 1.0))
        },
        |latest| Ok(dbhydro::is_latest(&series.periods, latest)),
    )
}

pub fn run(ctx: &Context) -> RunResult {
    let mut report = BatchReport::new("weather data", DataSource::Dbhydro);
    let weather = &ctx.registry.weather;

    for parameter in &weather.parameters {
        let series = match resolve_series(ctx, parameter) {
            Ok(series) => series,
            Err(e) => {
                report.add_error(format!("Could not look up {} series: {}", parameter, e));
                continue;
            }
        };

        for station in &weather.stations {
            let Some(file) = file_name(station, parameter) else {
                continue;
            };
            match series.get(station) {
                Some(s) => report.record(&file, sync_station(ctx, parameter, s)),
                None => {
                    logging::warn(DataSource::Dbhydro, Some(&file), "no daily series at this station");
                    report.add_missing(&file);
                }
            }
        }
    }

    for parameter in &weather.parameters {
        let Some((file, _)) = average_output(parameter) else {
            continue;
        };
        match merge_station_average(&ctx.workspace, &weather.stations, parameter) {
            Ok(path) => logging::info(DataSource::File, Some(file), &format!("wrote {}", path.display())),
            Err(e) => report.add_error(format!("Could not build {}: {}", file, e)),
        }
    }

    report.finish()
}

// ---------------------------------------------------------------------------
// Lake-wide averages
// ---------------------------------------------------------------------------

/// Outer-joins the stations' daily files on date and appends their mean.
///
/// A station's missing values count as 0; a date a station has no row for
/// is left out of that date's mean.
pub fn station_average(stations: &[TimeSeries], average_column: &str) -> TimeSeries {
    let mut columns: Vec<String> = stations
        .iter()
        .filter_map(|s| s.columns.first().cloned())
        .collect();
    columns.push(average_column.to_string());

    let mut by_date: BTreeMap<_, Vec<Option<f64>>> = BTreeMap::new();
    for (i, series) in stations.iter().enumerate() {
        for row in &series.rows {
            let cell = row.values.first().copied().flatten().unwrap_or(0.0);
            by_date
                .entry(row.date)
                .or_insert_with(|| vec![None; stations.len()])[i] = Some(cell);
        }
    }

    let mut merged = TimeSeries::new(columns);
    for (date, mut values) in by_date {
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        let mean = (!present.is_empty()).then(|| present.iter().sum::<f64>() / present.len() as f64);
        values.push(mean);
        merged.push(date, values);
    }
    merged
}

/// Builds `LAKE_RAINFALL_DATA.csv` (RAIN) or `LOONE_AVERAGE_ETPI_DATA.csv`
/// (ETPI) from the station files in `workspace`.
pub fn merge_station_average(workspace: &Path, stations: &[String], parameter: &str) -> Result<PathBuf, StoreError> {
    let (file, column) = average_output(parameter)
        .ok_or_else(|| StoreError::Rejected(format!("no station average is defined for {}", parameter)))?;

    let mut inputs = Vec::with_capacity(stations.len());
    for station in stations {
        let name = file_name(station, parameter).unwrap_or_default();
        let series = store::read(&workspace.join(&name), DEFAULT_DATE_COLUMN)?;
        let wanted = column_name(station, parameter).unwrap_or_default();
        let values = series.column(&wanted).unwrap_or_else(|| {
            series
                .rows
                .iter()
                .map(|r| r.values.first().copied().flatten())
                .collect()
        });
        let mut single = TimeSeries::new([wanted]);
        for (row, value) in series.rows.iter().zip(values) {
            single.push(row.date, vec![value]);
        }
        inputs.push(single);
    }

    let path = workspace.join(file);
    store::write_atomic(&path, &station_average(&inputs, column))?;
    Ok(path)
}

//! Laboratory water-quality results for the lake stations.
//!
//! One file per station and parameter, `water_quality_<station>_<name>.csv`,
//! holding the daily mean of the samples, a `days` counter and midnight
//! timestamps in the date column.

use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;

use super::Context;
use crate::config::WaterQualityConfig;
use crate::ingest::dbhydro;
use crate::logging::DataSource;
use crate::model::WaterQualitySample;
use crate::report::{BatchReport, RunResult};
use crate::store::{DateLayout, StoreError, TimeSeries};
use crate::sync::{sync, SyncFailure, SyncOutcome, SyncTarget};

pub const DAYS_COLUMN: &str = "days";

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1950, 1, 1).unwrap_or_default()
}

pub fn file_name(station: &str, parameter: &str) -> String {
    format!("water_quality_{}_{}.csv", station, parameter)
}

pub fn column_name(station: &str, parameter: &str, units: &str) -> String {
    format!("{}_{}_{}", station, parameter, units)
}

/// Daily mean of one station's samples. The units of the first sample name
/// the column; days whose samples are all non-numeric stay in as missing.
pub fn daily_mean(samples: &[WaterQualitySample], station: &str, parameter: &str) -> TimeSeries {
    let station_samples: Vec<&WaterQualitySample> = samples.iter().filter(|s| s.station == station).collect();
    let units = station_samples
        .first()
        .map(|s| s.units.trim().to_string())
        .unwrap_or_default();

    let mut days: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for sample in station_samples {
        let entry = days.entry(sample.collected).or_insert((0.0, 0));
        if let Some(value) = sample.value {
            entry.0 += value;
            entry.1 += 1;
        }
    }

    let mut series =
        TimeSeries::new([column_name(station, parameter, &units)]).with_layout(DateLayout::Midnight);
    for (date, (sum, count)) in days {
        let mean = (count > 0).then(|| sum / count as f64);
        series.push(date, vec![mean]);
    }
    series
}

/// Recomputes `days` over the whole series: days since the first date, plus
/// the first date's day of the month.
pub fn add_days_column(series: &mut TimeSeries) -> Result<(), StoreError> {
    let Some(first) = series.first_date() else {
        return Ok(());
    };
    let offset = i64::from(first.day());
    let days = series
        .rows
        .iter()
        .map(|r| Some(((r.date - first).num_days() + offset) as f64))
        .collect();
    series.set_column(DAYS_COLUMN, days);
    Ok(())
}

pub fn sync_station(
    ctx: &Context,
    parameter: &WaterQualityConfig,
    station: &str,
) -> Result<SyncOutcome, SyncFailure> {
    let key = format!("{} / {}", station, parameter.name);
    let target = SyncTarget::new(
        key.as_str(),
        ctx.path(&file_name(station, &parameter.name)),
        epoch(),
        ctx.today,
    )
    .finalize_with(add_days_column);

    sync(
        &target,
        |date_min, date_max| {
            let samples = ctx.retry(DataSource::Dbhydro, &key, || {
                dbhydro::fetch_water_quality(
                    &ctx.client,
                    &ctx.endpoints.dbhydro,
                    station,
                    parameter.test_number,
                    date_min,
                    date_max,
                )
            })?;
            Ok(daily_mean(&samples, station, &parameter.name))
        },
        |latest| {
            ctx.retry(DataSource::Dbhydro, &key, || {
                dbhydro::water_quality_is_latest(
                    &ctx.client,
                    &ctx.endpoints.dbhydro,
                    station,
                    parameter.test_number,
                    latest,
                    ctx.today,
                )
            })
        },
    )
}

pub fn run(ctx: &Context) -> RunResult {
    let mut report = BatchReport::new("water quality data", DataSource::Dbhydro);
    for parameter in &ctx.registry.water_quality {
        for station in &parameter.station_ids {
            report.record(
                &file_name(station, &parameter.name),
                sync_station(ctx, parameter, station),
            );
        }
    }
    report.finish()
}

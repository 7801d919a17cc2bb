//! Daily linear interpolation of sparse samples.
//!
//! Water-quality and radiation records are sampled every few days or weeks;
//! the model wants one value per day. Each station file is reduced to daily
//! means, missing values are discarded, and only whole months are kept:
//! samples after the last month-end on or before the final sample are
//! dropped. Negative values are then discarded and the remaining samples
//! become knots of a piecewise-linear daily series spanning the first to
//! the last knot.

use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{InterpolationConfig, Registry};
use crate::logging::{self, DataSource};
use crate::report::RunResult;
use crate::store::{self, StoreError, TimeSeries, DEFAULT_DATE_COLUMN};

/// Fewer rows than this and a file is left alone.
pub const MIN_ROWS: usize = 10;

pub const DATA_COLUMN: &str = "Data";

#[derive(Debug, thiserror::Error)]
pub enum InterpolationError {
    #[error("{name} has only {rows} rows, at least {MIN_ROWS} are needed")]
    TooFewRows { name: String, rows: usize },
    #[error("{0} has no usable values")]
    NoKnots(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Last day of the latest month that ends on or before `date`.
pub fn last_complete_month_end(date: NaiveDate) -> Option<NaiveDate> {
    let month_ends_today = date.succ_opt().is_none_or(|next| next.month() != date.month());
    if month_ends_today {
        Some(date)
    } else {
        date.with_day(1)?.pred_opt()
    }
}

/// Daily means of the present, non-negative values of `column`, cut back
/// to whole months.
pub fn knots(series: &TimeSeries, column: &str) -> Result<Vec<(NaiveDate, f64)>, StoreError> {
    let values = series.column(column).ok_or_else(|| StoreError::MissingColumn {
        path: PathBuf::from("<series>"),
        column: column.to_string(),
    })?;

    let mut days: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for (date, value) in series.dates().into_iter().zip(values) {
        if let Some(v) = value {
            let entry = days.entry(date).or_insert((0.0, 0));
            entry.0 += v;
            entry.1 += 1;
        }
    }

    // The cutoff uses the last daily mean, negative or not.
    let Some(cutoff) = days.keys().next_back().copied().and_then(last_complete_month_end) else {
        return Ok(Vec::new());
    };

    Ok(days
        .into_iter()
        .take_while(|(date, _)| *date <= cutoff)
        .map(|(date, (sum, count))| (date, sum / count as f64))
        .filter(|(_, mean)| *mean >= 0.0)
        .collect())
}

/// Day offset of `date` on the cumulative-day axis anchored at `origin`:
/// the origin sits at its own day of the month.
fn cumulative_day(origin: NaiveDate, date: NaiveDate) -> f64 {
    ((date - origin).num_days() + i64::from(origin.day())) as f64
}

/// Piecewise-linear interpolation with the end values held beyond the
/// knots. `xs` must be ascending.
pub fn interp(x: f64, xs: &[f64], ys: &[f64]) -> Option<f64> {
    let (first, last) = (*xs.first()?, *xs.last()?);
    if x <= first {
        return ys.first().copied();
    }
    if x >= last {
        return ys.last().copied();
    }
    let i = xs.partition_point(|&k| k <= x);
    let (x0, x1, y0, y1) = (xs[i - 1], xs[i], ys[i - 1], ys[i]);
    if x1 == x0 {
        return Some(y1);
    }
    Some(y0 + (y1 - y0) * (x - x0) / (x1 - x0))
}

/// One value per day from the first knot to the last.
pub fn interpolate_daily(knots: &[(NaiveDate, f64)]) -> TimeSeries {
    let mut series = TimeSeries::new([DATA_COLUMN]);
    let (Some(&(start, _)), Some(&(end, _))) = (knots.first(), knots.last()) else {
        return series;
    };

    let xs: Vec<f64> = knots.iter().map(|(d, _)| cumulative_day(start, *d)).collect();
    let ys: Vec<f64> = knots.iter().map(|(_, v)| *v).collect();

    for date in start.iter_days().take_while(|d| *d <= end) {
        series.push(date, vec![interp(cumulative_day(start, date), &xs, &ys)]);
    }
    series
}

/// The station's input file: `<station>_<parameter>.csv` if present,
/// otherwise the water-quality file. Returns the file stem and path.
pub fn find_input(workspace: &Path, station: &str, parameter: &str) -> Option<(String, PathBuf)> {
    let plain = format!("{}_{}", station, parameter);
    let water_quality = format!("water_quality_{}", plain);
    [plain, water_quality].into_iter().find_map(|name| {
        let path = workspace.join(format!("{}.csv", name));
        path.exists().then_some((name, path))
    })
}

/// Interpolates one station file and writes `<name>_Interpolated.csv`.
/// `Ok(None)` when the station has no input file.
pub fn interpolate_station(
    workspace: &Path,
    station: &str,
    parameter: &str,
    units: &str,
) -> Result<Option<PathBuf>, InterpolationError> {
    let Some((name, path)) = find_input(workspace, station, parameter) else {
        return Ok(None);
    };

    let series = store::read(&path, DEFAULT_DATE_COLUMN)?;
    if series.len() < MIN_ROWS {
        return Err(InterpolationError::TooFewRows {
            name,
            rows: series.len(),
        });
    }

    let column = format!("{}_{}_{}", station, parameter, units);
    let knots = knots(&series, &column).map_err(|e| match e {
        StoreError::MissingColumn { column, .. } => StoreError::MissingColumn {
            path: path.clone(),
            column,
        },
        other => other,
    })?;
    if knots.is_empty() {
        return Err(InterpolationError::NoKnots(name));
    }

    let out = workspace.join(format!("{}_Interpolated.csv", name));
    store::write_atomic(&out, &interpolate_daily(&knots))?;
    Ok(Some(out))
}

fn interpolate_target(workspace: &Path, target: &InterpolationConfig, errors: &mut Vec<String>) {
    logging::info(
        DataSource::File,
        Some(&target.parameter),
        &format!("Interpolating for stations {:?}", target.station_ids),
    );
    for station in &target.station_ids {
        let label = format!("{}_{}", station, target.parameter);
        match interpolate_station(workspace, station, &target.parameter, &target.units) {
            Ok(Some(path)) => logging::debug(DataSource::File, Some(&label), &format!("wrote {}", path.display())),
            Ok(None) => logging::info(DataSource::File, Some(&label), "Skipping, file does not exist"),
            Err(e @ InterpolationError::TooFewRows { .. }) => {
                logging::info(DataSource::File, Some(&label), &format!("Skipping, {}", e))
            }
            Err(e) => {
                logging::error(DataSource::File, Some(&label), &e.to_string());
                errors.push(format!("{}: {}", label, e));
            }
        }
    }
}

/// Interpolates every configured parameter and station. Missing inputs and
/// short records are skipped; unreadable files fail the run.
pub fn interpolate_all(registry: &Registry, workspace: &Path) -> RunResult {
    let mut errors = Vec::new();
    for target in &registry.interpolation {
        interpolate_target(workspace, target, &mut errors);
    }

    if errors.is_empty() {
        RunResult::Success("Completed interpolation.".to_string())
    } else {
        RunResult::Error(format!("Interpolation failed for: {}", errors.join("; ")))
    }
}

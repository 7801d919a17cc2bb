//! Daily stage for Lake Okeechobee and the Water Conservation Areas.
//!
//! One file per configured dataset (`LO_Stage.csv`, `Stg_3A3.csv`, ...),
//! one column per site. After the batch, gaps in the lake's NGVD29 record
//! are filled from the newer NAVD88 gauge, converted through NCAT.

use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;

use super::{pivot_by_site, Context};
use crate::config::WaterLevelConfig;
use crate::ingest::dbhydro;
use crate::ingest::ncat::{self, ConversionError};
use crate::ingest::FetchError;
use crate::logging::{self, DataSource};
use crate::model::{DailyValue, Location, StageKind};
use crate::report::{BatchReport, RunResult};
use crate::stations::LAKE_STAGE_STATION;
use crate::store::{self, StoreError, TimeSeries, DEFAULT_DATE_COLUMN};
use crate::sync::{sync, SyncFailure, SyncOutcome, SyncTarget};

/// Dataset holding the lake's NGVD29 stage record.
pub const LAKE_STAGE_DATASET: &str = "LO_Stage";
/// Dataset holding the NAVD88 gauge that replaced it.
pub const LAKE_STAGE_NAVD88_DATASET: &str = "LO_Stage_2";

pub const CONVERSION_FAILED: &str = "Failed to convert NAVD88 to NGVD29 for 'L OKEE' station.";

fn default_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1950, 1, 1).unwrap_or_default()
}

pub fn file_name(dataset: &WaterLevelConfig) -> String {
    format!("{}.csv", dataset.name)
}

/// `<site>_<STG|GAGHT>_<units>`, with the site renamed when the dataset
/// overrides its code.
pub fn column_name(dataset: &WaterLevelConfig, site_code: &str) -> String {
    let site = dataset
        .override_site_codes
        .get(site_code)
        .map(String::as_str)
        .unwrap_or(site_code);
    format!("{}_{}_{}", site, dataset.kind.code(), dataset.kind.units())
}

/// Column of the lake stage record in both lake stage files.
pub fn lake_stage_column() -> String {
    format!(
        "{}_{}_{}",
        LAKE_STAGE_STATION,
        StageKind::Stage.code(),
        StageKind::Stage.units()
    )
}

/// One row per date, one column per site (sites in code order).
pub fn pivot(values: &[DailyValue], dataset: &WaterLevelConfig) -> TimeSeries {
    pivot_by_site(values, |site| column_name(dataset, site), 1.0)
}

/// Syncs one dataset file. Closed series (with a `date_max`) never request
/// anything past it.
pub fn sync_dataset(ctx: &Context, dataset: &WaterLevelConfig) -> Result<SyncOutcome, SyncFailure> {
    let epoch = dataset.date_min.unwrap_or_else(default_epoch);
    let until = dataset.date_max.map_or(ctx.today, |max| max.min(ctx.today));
    let target = SyncTarget::new(&dataset.name, ctx.path(&file_name(dataset)), epoch, until);
    let dbkeys: Vec<&str> = dataset.dbkeys.iter().map(String::as_str).collect();

    sync(
        &target,
        |date_min, date_max| {
            let values = ctx.retry(DataSource::Dbhydro, &dataset.name, || {
                dbhydro::fetch_daily(
                    &ctx.client,
                    &ctx.endpoints.dbhydro,
                    &dbkeys,
                    date_min,
                    date_max,
                    dataset.datum,
                )
            })?;
            Ok(pivot(&values, dataset))
        },
        |latest| ctx.all_latest(&dbkeys, latest),
    )
}

/// Syncs every configured water-level dataset, then merges the lake stage
/// records.
pub fn run(ctx: &Context) -> RunResult {
    let mut report = BatchReport::new("water level data", DataSource::Dbhydro);
    for dataset in &ctx.registry.water_level {
        report.record(&file_name(dataset), sync_dataset(ctx, dataset));
    }

    let has_lake_pair = ctx.registry.water_level_dataset(LAKE_STAGE_DATASET).is_some()
        && ctx.registry.water_level_dataset(LAKE_STAGE_NAVD88_DATASET).is_some();
    if has_lake_pair {
        match merge_lake_stage(ctx) {
            Ok(filled) => logging::info(
                DataSource::Ncat,
                Some(LAKE_STAGE_STATION),
                &format!("Filled {} days of lake stage from the NAVD88 gauge", filled),
            ),
            Err(e) => {
                match &e {
                    LakeStageError::Conversion(inner) => logging::log_conversion_failure(LAKE_STAGE_STATION, inner),
                    other => logging::error(DataSource::Ncat, Some(LAKE_STAGE_STATION), &other.to_string()),
                }
                report.add_error(CONVERSION_FAILED);
            }
        }
    }

    report.finish()
}

// ---------------------------------------------------------------------------
// Lake stage datum merge
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LakeStageError {
    #[error("Missing {0}, cannot convert and merge")]
    MissingFile(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// Fills dates where `lo_stage` has no lake stage but `lo_stage_2` does,
/// converting each NAVD88 value with `convert(value, year)`.
///
/// All or nothing: if any conversion fails, `lo_stage` is left untouched.
/// Returns the number of filled days.
pub fn fill_lake_stage<F>(lo_stage: &mut TimeSeries, lo_stage_2: &TimeSeries, mut convert: F) -> Result<usize, ConversionError>
where
    F: FnMut(f64, i32) -> Result<Option<f64>, ConversionError>,
{
    let column = lake_stage_column();
    let (Some(target_idx), Some(source_idx)) = (lo_stage.column_index(&column), lo_stage_2.column_index(&column)) else {
        return Ok(0);
    };

    let navd88: BTreeMap<NaiveDate, f64> = lo_stage_2
        .rows
        .iter()
        .filter_map(|r| r.values[source_idx].map(|v| (r.date, v)))
        .collect();

    let mut converted = Vec::new();
    for (i, row) in lo_stage.rows.iter().enumerate() {
        if row.values[target_idx].is_some() {
            continue;
        }
        let Some(&value) = navd88.get(&row.date) else {
            continue;
        };
        if let Some(ngvd29) = convert(value, row.date.year())? {
            converted.push((i, ngvd29));
        }
    }

    for (i, value) in &converted {
        lo_stage.rows[*i].values[target_idx] = Some(*value);
    }
    Ok(converted.len())
}

/// Rewrites `LO_Stage.csv` with gaps filled from `LO_Stage_2.csv`.
pub fn merge_lake_stage(ctx: &Context) -> Result<usize, LakeStageError> {
    let primary = ctx.path(&format!("{}.csv", LAKE_STAGE_DATASET));
    let secondary = ctx.path(&format!("{}.csv", LAKE_STAGE_NAVD88_DATASET));
    for path in [&primary, &secondary] {
        if !path.exists() {
            return Err(LakeStageError::MissingFile(path.display().to_string()));
        }
    }

    logging::info(DataSource::Ncat, Some(LAKE_STAGE_STATION), "Merging data for station 'L OKEE'");
    let mut lo_stage = store::read(&primary, DEFAULT_DATE_COLUMN)?;
    let lo_stage_2 = store::read(&secondary, DEFAULT_DATE_COLUMN)?;

    let mut location: Option<Location> = None;
    let filled = fill_lake_stage(&mut lo_stage, &lo_stage_2, |stage, year| {
        let here = match location {
            Some(here) => here,
            None => {
                let here = ctx.retry(DataSource::Dbhydro, LAKE_STAGE_STATION, || {
                    dbhydro::fetch_station_location(&ctx.client, &ctx.endpoints.site_station, LAKE_STAGE_STATION)
                })?;
                location = Some(here);
                here
            }
        };
        let converted = ctx.retry(DataSource::Ncat, LAKE_STAGE_STATION, || -> Result<_, FetchError> {
            ncat::navd88_to_ngvd29(&ctx.client, &ctx.endpoints.ncat, here, Some(stage), year).map_err(|e| e.0)
        })?;
        Ok(converted)
    })?;

    if filled > 0 {
        store::write_atomic(&primary, &lo_stage)?;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Registry;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn value(site: &str, date: &str, v: Option<f64>) -> DailyValue {
        DailyValue {
            dbkey: "16022".into(),
            site_code: site.into(),
            date: d(date),
            value: v,
            qualifier: String::new(),
        }
    }

    #[test]
    fn test_pivot_one_column_per_site() {
        let registry = Registry::default();
        let dataset = registry.water_level_dataset("LO_Stage").unwrap();
        let values = vec![
            value("S4", "2023-07-02", Some(12.1)),
            value("L OKEE", "2023-07-01", Some(12.5)),
            value("S4", "2023-07-01", Some(12.0)),
        ];
        let series = pivot(&values, dataset);
        assert_eq!(series.columns, vec!["L OKEE_STG_ft NGVD29", "S4_STG_ft NGVD29"]);
        assert_eq!(series.dates(), vec![d("2023-07-01"), d("2023-07-02")]);
        assert_eq!(series.rows[1].values, vec![None, Some(12.1)]);
    }

    #[test]
    fn test_gauge_height_columns_use_override_codes() {
        let registry = Registry::default();
        let dataset = registry.water_level_dataset("Stg_3A3").unwrap();
        assert_eq!(column_name(dataset, "3A-3"), "3-63_GAGHT_feet");
        assert_eq!(column_name(dataset, "OTHER"), "OTHER_GAGHT_feet");
        assert_eq!(file_name(dataset), "Stg_3A3.csv");
    }

    fn lake(rows: &[(&str, Option<f64>)]) -> TimeSeries {
        let mut series = TimeSeries::new([lake_stage_column()]);
        for (date, v) in rows {
            series.push(d(date), vec![*v]);
        }
        series
    }

    #[test]
    fn test_fill_lake_stage_only_fills_gaps_with_a_source_value() {
        let mut lo_stage = lake(&[
            ("2024-04-29", Some(13.0)),
            ("2024-04-30", None),
            ("2024-05-01", None),
        ]);
        let lo_stage_2 = lake(&[("2024-04-29", Some(11.0)), ("2024-04-30", Some(11.5))]);

        let mut calls = Vec::new();
        let filled = fill_lake_stage(&mut lo_stage, &lo_stage_2, |v, year| {
            calls.push((v, year));
            Ok(Some(v + 1.25))
        })
        .unwrap();

        assert_eq!(filled, 1);
        assert_eq!(calls, vec![(11.5, 2024)]);
        assert_eq!(
            lo_stage.column(&lake_stage_column()),
            Some(vec![Some(13.0), Some(12.75), None])
        );
    }

    #[test]
    fn test_fill_lake_stage_is_all_or_nothing() {
        let mut lo_stage = lake(&[("2024-05-01", None), ("2024-05-02", None)]);
        let before = lo_stage.clone();
        let lo_stage_2 = lake(&[("2024-05-01", Some(11.0)), ("2024-05-02", Some(11.1))]);

        let mut calls = 0;
        let result = fill_lake_stage(&mut lo_stage, &lo_stage_2, |v, _| {
            calls += 1;
            if calls == 2 {
                Err(ConversionError(FetchError::Http(503)))
            } else {
                Ok(Some(v))
            }
        });

        assert!(result.is_err());
        assert_eq!(lo_stage, before);
    }

    #[test]
    fn test_merge_lake_stage_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(
            dir.path(),
            Registry::default(),
            crate::config::Endpoints::default(),
            d("2024-05-02"),
        )
        .unwrap();
        assert!(matches!(merge_lake_stage(&ctx), Err(LakeStageError::MissingFile(_))));
    }
}

//! Dataset families maintained in a LOONE workspace.
//!
//! Each submodule turns one family's configuration table into a series of
//! incremental syncs (or, for forecasts, full rewrites), names the files and
//! columns the model expects, and reports the batch as a `RunResult`.
//!
//! Submodules:
//! - `water_level`: lake and conservation-area stage, plus the L OKEE datum merge
//! - `water_quality`: laboratory results per station and parameter
//! - `flow`: daily structure outflows, plus the closed S65E total record
//! - `drought`: weekly Palmer drought index
//! - `weather`: daily weather per station, plus lake-wide averages
//! - `forecast`: GEOGLOWS flow ensembles, net inflows, weather forecast

pub mod drought;
pub mod flow;
pub mod forecast;
pub mod water_level;
pub mod water_quality;
pub mod weather;

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::config::{Endpoints, Registry};
use crate::ingest::dbhydro::{self, PeriodOfRecord};
use crate::ingest::{http_client, FetchError};
use crate::logging::DataSource;
use crate::model::DailyValue;
use crate::retry::with_backoff;
use crate::store::TimeSeries;

/// Everything a batch needs: where to write, what to fetch, how to reach
/// the services, and which day counts as "today".
pub struct Context {
    pub workspace: PathBuf,
    pub registry: Registry,
    pub endpoints: Endpoints,
    pub client: reqwest::blocking::Client,
    pub today: NaiveDate,
}

impl Context {
    pub fn new(
        workspace: impl Into<PathBuf>,
        registry: Registry,
        endpoints: Endpoints,
        today: NaiveDate,
    ) -> Result<Self, FetchError> {
        let client = http_client(endpoints.timeout())?;
        Ok(Context {
            workspace: workspace.into(),
            registry,
            endpoints,
            client,
            today,
        })
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.workspace.join(file_name)
    }

    /// Runs a remote call under the registry's retry policy.
    pub fn retry<T, F>(&self, source: DataSource, label: &str, op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Result<T, FetchError>,
    {
        with_backoff(&self.registry.retry, source, label, op)
    }

    /// Period-of-record metadata for `dbkeys`, grouped by dbkey. One request
    /// serves both station-name lookup and later freshness checks.
    pub fn series_metadata(&self, dbkeys: &[&str]) -> Result<BTreeMap<String, Vec<PeriodOfRecord>>, FetchError> {
        let periods = self.retry(DataSource::Dbhydro, "period of record", || {
            dbhydro::fetch_period_of_record(&self.client, &self.endpoints.dbhydro, dbkeys)
        })?;
        Ok(group_by_dbkey(periods))
    }

    /// True when every one of `dbkeys` is known to DBHYDRO and none has
    /// data after `latest`.
    pub fn all_latest(&self, dbkeys: &[&str], latest: NaiveDate) -> Result<bool, FetchError> {
        let metadata = self.series_metadata(dbkeys)?;
        Ok(all_latest(&metadata, dbkeys, latest))
    }
}

pub(crate) fn all_latest(
    metadata: &BTreeMap<String, Vec<PeriodOfRecord>>,
    dbkeys: &[&str],
    latest: NaiveDate,
) -> bool {
    dbkeys
        .iter()
        .all(|key| metadata.get(*key).is_some_and(|periods| dbhydro::is_latest(periods, latest)))
}

pub(crate) fn group_by_dbkey(periods: Vec<PeriodOfRecord>) -> BTreeMap<String, Vec<PeriodOfRecord>> {
    let mut grouped: BTreeMap<String, Vec<PeriodOfRecord>> = BTreeMap::new();
    for period in periods {
        if let Some(dbkey) = period.dbkey.clone() {
            grouped.entry(dbkey).or_default().push(period);
        }
    }
    grouped
}

/// Station recorded in a series' metadata, if any.
pub(crate) fn station_of(periods: &[PeriodOfRecord]) -> Option<String> {
    periods
        .iter()
        .filter_map(|p| p.station.as_deref())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// One-column daily series from DBHYDRO values, each multiplied by `scale`.
pub(crate) fn daily_series(values: &[DailyValue], column: &str, scale: f64) -> TimeSeries {
    let mut series = TimeSeries::new([column]);
    for value in values {
        series.push(value.date, vec![value.value.map(|v| v * scale)]);
    }
    series
}

/// One row per date, one column per site code (in code order), each value
/// multiplied by `scale`. Values without a site code are dropped.
pub(crate) fn pivot_by_site<F>(values: &[DailyValue], column: F, scale: f64) -> TimeSeries
where
    F: Fn(&str) -> String,
{
    let sites: Vec<&str> = values
        .iter()
        .map(|v| v.site_code.trim())
        .filter(|site| !site.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut by_date: BTreeMap<NaiveDate, Vec<Option<f64>>> = BTreeMap::new();
    for value in values {
        let Ok(idx) = sites.binary_search(&value.site_code.trim()) else {
            continue;
        };
        by_date
            .entry(value.date)
            .or_insert_with(|| vec![None; sites.len()])[idx] = value.value.map(|v| v * scale);
    }

    let mut series = TimeSeries::new(sites.iter().map(|site| column(site)));
    for (date, row) in by_date {
        series.push(date, row);
    }
    series
}

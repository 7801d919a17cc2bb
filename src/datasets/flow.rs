//! Daily outflows at the lake's control structures.
//!
//! DBHYDRO reports flow in cubic feet per second; files hold cubic meters
//! per day in `<station>_FLOW_cmd.csv`. Station names come from the series
//! metadata, which is fetched once per batch and also answers the
//! freshness check.
//!
//! `S65E_total.csv` is a closed record of the two S65E discharge series,
//! one column per site, kept for model calibration runs.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::Path;

use super::{daily_series, pivot_by_site, station_of, Context};
use crate::ingest::dbhydro::{self, PeriodOfRecord};
use crate::logging::{self, DataSource};
use crate::model::{DailyValue, Datum, CFS_TO_CMD};
use crate::report::{BatchReport, RunResult};
use crate::stations::S65E_TOTAL_DBKEYS;
use crate::store::TimeSeries;
use crate::sync::{sync, SyncFailure, SyncOutcome, SyncTarget};

pub const S65E_TOTAL_FILE: &str = "S65E_total.csv";

pub fn column_name(station: &str) -> String {
    format!("{}_FLOW_cmd", station)
}

/// Spaces in station names become underscores in the file name only.
pub fn file_name(station: &str) -> String {
    format!("{}.csv", column_name(&station.replace(' ', "_")))
}

pub fn sync_dbkey(
    ctx: &Context,
    dbkey: &str,
    station: &str,
    periods: &[PeriodOfRecord],
) -> Result<SyncOutcome, SyncFailure> {
    let column = column_name(station);
    let target = SyncTarget::new(
        format!("{} ({})", station, dbkey),
        ctx.path(&file_name(station)),
        ctx.registry.flow.date_min,
        ctx.today,
    );

    sync(
        &target,
        |date_min, date_max| {
            let values = ctx.retry(DataSource::Dbhydro, &column, || {
                dbhydro::fetch_daily(
                    &ctx.client,
                    &ctx.endpoints.dbhydro,
                    &[dbkey],
                    date_min,
                    date_max,
                    Datum::Ngvd29,
                )
            })?;
            Ok(daily_series(&values, &column, CFS_TO_CMD))
        },
        |latest| Ok(dbhydro::is_latest(periods, latest)),
    )
}

pub fn run(ctx: &Context) -> RunResult {
    let mut report = BatchReport::new("outflow data", DataSource::Dbhydro);
    let dbkeys: Vec<&str> = ctx.registry.flow.dbkeys.iter().map(String::as_str).collect();

    let metadata = match ctx.series_metadata(&dbkeys) {
        Ok(metadata) => metadata,
        Err(e) => {
            report.add_error(format!("Could not look up the outflow stations: {}", e));
            return report.finish();
        }
    };

    for (dbkey, station, periods) in resolve_stations(&dbkeys, &metadata) {
        match station {
            Some(station) => report.record(&file_name(&station), sync_dbkey(ctx, dbkey, &station, periods)),
            None => {
                logging::warn(DataSource::Dbhydro, Some(dbkey), "no station name in the series metadata");
                report.add_missing(&format!("dbkey {}", dbkey));
            }
        }
    }
    report.finish()
}

/// Pairs every dbkey with its station name and metadata, in configured order.
fn resolve_stations<'a>(
    dbkeys: &[&'a str],
    metadata: &'a BTreeMap<String, Vec<PeriodOfRecord>>,
) -> Vec<(&'a str, Option<String>, &'a [PeriodOfRecord])> {
    dbkeys
        .iter()
        .map(|dbkey| {
            let periods = metadata.get(*dbkey).map(Vec::as_slice).unwrap_or(&[]);
            (*dbkey, station_of(periods), periods)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// S65E total
// ---------------------------------------------------------------------------

fn s65e_total_range() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(1972, 1, 1).unwrap_or_default(),
        NaiveDate::from_ymd_opt(2023, 6, 30).unwrap_or_default(),
    )
}

/// Headers keep the `cfs` tag the model reads even though values are m³/day.
pub fn s65e_total_column(site: &str) -> String {
    format!("{}_FLOW_cfs", site)
}

pub fn s65e_total_series(values: &[DailyValue]) -> TimeSeries {
    pivot_by_site(values, s65e_total_column, CFS_TO_CMD)
}

pub fn s65e_total_target(workspace: &Path, today: NaiveDate) -> SyncTarget {
    let (epoch, until) = s65e_total_range();
    SyncTarget::new("S65E_total", workspace.join(S65E_TOTAL_FILE), epoch, until.min(today))
}

pub fn sync_s65e_total(ctx: &Context) -> Result<SyncOutcome, SyncFailure> {
    let target = s65e_total_target(&ctx.workspace, ctx.today);
    sync(
        &target,
        |date_min, date_max| {
            let values = ctx.retry(DataSource::Dbhydro, &target.key, || {
                dbhydro::fetch_daily(
                    &ctx.client,
                    &ctx.endpoints.dbhydro,
                    S65E_TOTAL_DBKEYS,
                    date_min,
                    date_max,
                    Datum::Ngvd29,
                )
            })?;
            Ok(s65e_total_series(&values))
        },
        |latest| ctx.all_latest(S65E_TOTAL_DBKEYS, latest),
    )
}

pub fn run_s65e_total(ctx: &Context) -> RunResult {
    let mut report = BatchReport::new("S65E total flow", DataSource::Dbhydro);
    report.record(S65E_TOTAL_FILE, sync_s65e_total(ctx));
    report.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::FetchError;
    use crate::store;

    #[test]
    fn test_names_replace_spaces_only_in_file_name() {
        assert_eq!(column_name("S65E"), "S65E_FLOW_cmd");
        assert_eq!(file_name("S65E"), "S65E_FLOW_cmd.csv");
        assert_eq!(column_name("FISHP 2"), "FISHP 2_FLOW_cmd");
        assert_eq!(file_name("FISHP 2"), "FISHP_2_FLOW_cmd.csv");
    }

    #[test]
    fn test_cfs_to_cubic_meters_per_day() {
        assert!((CFS_TO_CMD - 2446.575546).abs() < 1e-6);
    }

    #[test]
    fn test_resolve_stations_keeps_unknown_dbkeys() {
        let metadata = BTreeMap::from([(
            "91370".to_string(),
            vec![PeriodOfRecord {
                dbkey: Some("91370".into()),
                station: Some("S308.DS".into()),
                start: None,
                end: NaiveDate::from_ymd_opt(2023, 7, 5),
            }],
        )]);
        let resolved = resolve_stations(&["91370", "JW224"], &metadata);
        assert_eq!(resolved[0].1.as_deref(), Some("S308.DS"));
        assert_eq!(resolved[1].0, "JW224");
        assert!(resolved[1].1.is_none());
        assert!(resolved[1].2.is_empty());
    }

    fn value(dbkey: &str, site: &str, date: &str, cfs: Option<f64>) -> DailyValue {
        DailyValue {
            dbkey: dbkey.into(),
            site_code: site.into(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            value: cfs,
            qualifier: String::new(),
        }
    }

    #[test]
    fn test_s65e_total_one_column_per_site_in_cubic_meters() {
        let values = vec![
            value("91656", "S65E_S", "1972-01-01", Some(100.0)),
            value("AL760", "S65EX1_S", "1972-01-02", Some(1.0)),
            value("91656", "S65E_S", "1972-01-02", None),
            value("AL760", " ", "1972-01-02", Some(5.0)),
        ];
        let series = s65e_total_series(&values);
        assert_eq!(series.columns, vec!["S65EX1_S_FLOW_cfs", "S65E_S_FLOW_cfs"]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.rows[0].values, vec![None, Some(100.0 * CFS_TO_CMD)]);
        assert_eq!(series.rows[1].values, vec![Some(CFS_TO_CMD), None]);
    }

    #[test]
    fn test_s65e_total_is_closed_at_mid_2023() {
        let dir = tempfile::tempdir().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let target = s65e_total_target(dir.path(), today);
        assert_eq!(target.epoch, NaiveDate::from_ymd_opt(1972, 1, 1).unwrap());
        assert_eq!(target.until, NaiveDate::from_ymd_opt(2023, 6, 30).unwrap());
        assert!(target.path.ends_with(S65E_TOTAL_FILE));

        let requested = std::cell::Cell::new(None);
        sync(
            &target,
            |a, b| {
                requested.set(Some((a, b)));
                Ok(s65e_total_series(&[
                    value("91656", "S65E_S", "1972-01-01", Some(1.0)),
                    value("91656", "S65E_S", "2023-06-30", Some(2.0)),
                ]))
            },
            |_| Ok(false),
        )
        .unwrap();
        assert_eq!(requested.get(), Some((target.epoch, target.until)));
        let written = store::read(&target.path, "date").unwrap();
        assert_eq!(written.columns, vec!["S65E_S_FLOW_cfs"]);

        // Once the file reaches the end date nothing is ever requested again.
        let outcome = sync(
            &target,
            |_, _| Err(FetchError::Http(500)),
            |_| panic!("a closed series is never checked for freshness"),
        );
        assert!(matches!(outcome, Ok(SyncOutcome::Skipped { .. })));
    }
}

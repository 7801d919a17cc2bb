/// Integration tests for the incremental sync against a real workspace
///
/// The remote side is a closure over an in-memory "server" series, so these
/// run without network access. Each test works in its own temporary
/// directory and checks what ends up on disk.

use chrono::NaiveDate;
use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};

use loone_prep::datasets::water_quality::{add_days_column, DAYS_COLUMN};
use loone_prep::ingest::FetchError;
use loone_prep::logging::DataSource;
use loone_prep::report::BatchReport;
use loone_prep::store::{self, DateLayout, StoreError, TimeSeries};
use loone_prep::sync::{sync, SyncError, SyncOutcome, SyncTarget};

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// The remote record: one stage reading per day, 12.0 + day-of-year/100.
fn remote(from: NaiveDate, to: NaiveDate) -> TimeSeries {
    let mut series = TimeSeries::new(["L OKEE_STG_ft NGVD29"]);
    for day in from.iter_days().take_while(|day| *day <= to) {
        let doy = day.format("%j").to_string().parse::<f64>().unwrap();
        series.push(day, vec![Some(12.0 + doy / 100.0)]);
    }
    series
}

fn remote_until(end: NaiveDate) -> impl FnMut(NaiveDate, NaiveDate) -> Result<TimeSeries, FetchError> {
    move |a, b| Ok(remote(a, b.min(end)))
}

fn files_in(dir: &Path) -> usize {
    fs::read_dir(dir).unwrap().count()
}

fn reject(_: &mut TimeSeries) -> Result<(), StoreError> {
    Err(StoreError::Rejected("injected failure".into()))
}

thread_local! {
    /// Path `occupy_dataset_path` puts a directory at.
    static OCCUPIED: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

/// Lets the merge succeed but leaves a directory where the merged file must
/// be renamed to, so the final write fails.
fn occupy_dataset_path(_: &mut TimeSeries) -> Result<(), StoreError> {
    OCCUPIED.with(|occupied| {
        if let Some(path) = occupied.borrow().as_ref() {
            fs::create_dir(path).unwrap();
        }
    });
    Ok(())
}

#[test]
fn test_first_sync_requests_the_full_range() {
    println!("\n🧪 first sync downloads epoch..until");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("LO_Stage.csv");
    let target = SyncTarget::new("LO_Stage", &path, d("2023-01-01"), d("2023-03-31"));

    let requested = Cell::new(None);
    let outcome = sync(
        &target,
        |a, b| {
            requested.set(Some((a, b)));
            Ok(remote(a, b))
        },
        |_| panic!("a missing file never asks whether it is current"),
    )
    .unwrap();

    assert_eq!(requested.get(), Some((d("2023-01-01"), d("2023-03-31"))));
    assert_eq!(
        outcome,
        SyncOutcome::Created {
            rows: 90,
            first: d("2023-01-01"),
            last: d("2023-03-31"),
        }
    );
    let series = store::read(&path, "date").unwrap();
    assert_eq!(series.len(), 90);
    assert!(series.is_strictly_ascending());
    assert_eq!(files_in(dir.path()), 1);
}

#[test]
fn test_five_new_days_are_appended() {
    println!("\n🧪 incremental update appends only new days");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("LO_Stage.csv");

    let june = SyncTarget::new("LO_Stage", &path, d("2023-06-01"), d("2023-06-30"));
    sync(&june, remote_until(d("2023-06-30")), |_| Ok(false)).unwrap();
    let before = store::read(&path, "date").unwrap();

    let july = SyncTarget::new("LO_Stage", &path, d("2023-06-01"), d("2023-07-10"));
    let outcome = sync(&july, remote_until(d("2023-07-05")), |_| Ok(false)).unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Updated {
            appended: 5,
            latest: d("2023-07-05"),
        }
    );

    let after = store::read(&path, "date").unwrap();
    assert_eq!(after.len(), before.len() + 5);
    assert_eq!(&after.rows[..before.len()], &before.rows[..]);
    assert_eq!(files_in(dir.path()), 1);
}

#[test]
fn test_current_file_is_skipped_without_writing() {
    println!("\n🧪 up-to-date file is left byte-identical");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("LO_Stage.csv");
    let target = SyncTarget::new("LO_Stage", &path, d("2023-06-01"), d("2023-07-10"));
    sync(&target, remote_until(d("2023-07-05")), |_| Ok(false)).unwrap();

    let bytes = fs::read(&path).unwrap();
    let modified = fs::metadata(&path).unwrap().modified().unwrap();

    let outcome = sync(
        &target,
        |_, _| panic!("fetch must not be called when the file is current"),
        |latest| Ok(latest >= d("2023-07-05")),
    )
    .unwrap();

    assert_eq!(outcome, SyncOutcome::Skipped { latest: d("2023-07-05") });
    assert_eq!(fs::read(&path).unwrap(), bytes);
    assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);
}

#[test]
fn test_repeated_sync_is_idempotent() {
    println!("\n🧪 re-running against an unchanged remote changes nothing");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("LO_Stage.csv");
    let target = SyncTarget::new("LO_Stage", &path, d("2023-06-01"), d("2023-07-10"));
    sync(&target, remote_until(d("2023-07-05")), |_| Ok(false)).unwrap();
    let bytes = fs::read(&path).unwrap();

    // The remote claims to have more, but returns nothing past what we hold.
    let failure = sync(&target, remote_until(d("2023-07-05")), |_| Ok(false)).unwrap_err();
    assert!(failure.existing);
    assert!(matches!(
        failure.error,
        SyncError::NoNewData { after: Some(after), .. } if after == d("2023-07-05")
    ));
    assert_eq!(fs::read(&path).unwrap(), bytes);
    assert_eq!(files_in(dir.path()), 1);
}

#[test]
fn test_failed_finalize_restores_the_original_file() {
    println!("\n🧪 a failure after the file is moved aside puts it back");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("LO_Stage.csv");
    let target = SyncTarget::new("LO_Stage", &path, d("2023-06-01"), d("2023-06-30"));
    sync(&target, remote_until(d("2023-06-30")), |_| Ok(false)).unwrap();
    let bytes = fs::read(&path).unwrap();

    let failing = SyncTarget::new("LO_Stage", &path, d("2023-06-01"), d("2023-07-10")).finalize_with(reject);
    let failure = sync(&failing, remote_until(d("2023-07-10")), |_| Ok(false)).unwrap_err();

    assert!(failure.existing);
    assert!(matches!(failure.error, SyncError::Merge(StoreError::Rejected(_))));
    assert_eq!(fs::read(&path).unwrap(), bytes);
    assert_eq!(files_in(dir.path()), 1, "no backup or partial file is left behind");
}

#[test]
fn test_failed_write_restores_the_original_file() {
    println!("\n🧪 a write that fails after the file is moved aside puts it back");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("LO_Stage.csv");
    let target = SyncTarget::new("LO_Stage", &path, d("2023-06-01"), d("2023-06-30"));
    sync(&target, remote_until(d("2023-06-30")), |_| Ok(false)).unwrap();
    let bytes = fs::read(&path).unwrap();

    OCCUPIED.with(|occupied| *occupied.borrow_mut() = Some(path.clone()));
    let failing = SyncTarget::new("LO_Stage", &path, d("2023-06-01"), d("2023-07-10"))
        .finalize_with(occupy_dataset_path);
    let failure = sync(&failing, remote_until(d("2023-07-10")), |_| Ok(false)).unwrap_err();
    OCCUPIED.with(|occupied| *occupied.borrow_mut() = None);

    assert!(failure.existing);
    assert!(matches!(failure.error, SyncError::Merge(StoreError::Io { .. })));
    assert!(path.is_file());
    assert_eq!(fs::read(&path).unwrap(), bytes);
    assert_eq!(files_in(dir.path()), 1, "no backup or partial file is left behind");
}

#[test]
fn test_days_column_is_recomputed_over_the_merged_series() {
    println!("\n🧪 water quality 'days' spans old and new rows");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("water_quality_L001_AMMONIA-N.csv");
    fs::write(
        &path,
        "date,L001_AMMONIA-N_mg/L,days\n2023-07-03 00:00:00,0.5,3\n2023-07-10 00:00:00,0.4,10\n",
    )
    .unwrap();

    let target = SyncTarget::new("L001 / AMMONIA-N", &path, d("1950-01-01"), d("2023-08-31"))
        .finalize_with(add_days_column);
    let outcome = sync(
        &target,
        |_, _| {
            let mut fresh = TimeSeries::new(["L001_AMMONIA-N_mg/L"]).with_layout(DateLayout::Midnight);
            fresh.push(d("2023-08-01"), vec![Some(0.3)]);
            Ok(fresh)
        },
        |_| Ok(false),
    )
    .unwrap();
    assert_eq!(outcome, SyncOutcome::Updated { appended: 1, latest: d("2023-08-01") });

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(
        text,
        "date,L001_AMMONIA-N_mg/L,days\n\
         2023-07-03 00:00:00,0.5,3\n\
         2023-07-10 00:00:00,0.4,10\n\
         2023-08-01 00:00:00,0.3,32\n"
    );
}

#[test]
fn test_batch_report_lists_every_dataset() {
    println!("\n🧪 batch report separates new files from stale ones");
    let dir = tempfile::tempdir().unwrap();
    let mut report = BatchReport::new("water level data", DataSource::Dbhydro);

    let fresh = SyncTarget::new("LO_Stage", dir.path().join("LO_Stage.csv"), d("2023-06-01"), d("2023-06-30"));
    report.record("LO_Stage.csv", sync(&fresh, remote_until(d("2023-06-30")), |_| Ok(false)));

    let empty = SyncTarget::new("Stg_3A3", dir.path().join("Stg_3A3.csv"), d("2023-06-01"), d("2023-06-30"));
    report.record("Stg_3A3.csv", sync(&empty, |_, _| Err(FetchError::Http(503)), |_| Ok(false)));

    assert_eq!(report.outcomes().len(), 1);
    assert_eq!(report.missing_files(), ["Stg_3A3.csv".to_string()]);
    assert!(report.failed_updates().is_empty());

    let result = report.finish();
    assert!(!result.is_success());
    assert_eq!(
        result.message(),
        "The following files could not be downloaded: ['Stg_3A3.csv']"
    );
}

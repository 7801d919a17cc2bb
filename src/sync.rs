//! Incremental time-series sync.
//!
//! Brings one dataset file up to date with its remote source:
//!
//! 1. Read the latest date already on disk (absent file → full download).
//! 2. Ask the source whether it has anything newer; if not, do nothing.
//! 3. Fetch only rows after the latest date, merge them into the file with
//!    newer rows winning, and replace the file.
//!
//! The replace step runs inside a [`ReplaceGuard`]: the existing file is
//! moved aside before the merged file is written and moved back if anything
//! fails before commit, so the canonical file is always either the old
//! contents or the fully merged contents.
//!
//! Remote access is injected as two closures so the same routine serves
//! every data source and can be tested without a network.

use chrono::NaiveDate;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::FetchError;
use crate::logging::{self, DataSource};
use crate::store::{self, StoreError, TimeSeries, DEFAULT_DATE_COLUMN};

/// Post-merge transform, applied to the full series before it is written.
pub type Finalize = fn(&mut TimeSeries) -> Result<(), StoreError>;

/// Everything the sync routine needs to know about one dataset.
#[derive(Debug, Clone)]
pub struct SyncTarget {
    /// Stable dataset key, e.g. `LO_Stage` or `L001 / PHOSPHATE, TOTAL AS P`.
    pub key: String,
    pub path: PathBuf,
    /// Column the merge deduplicates on.
    pub merge_key: String,
    /// First date requested on a full download.
    pub epoch: NaiveDate,
    /// Last date requested on any download ("today" unless the series is closed).
    pub until: NaiveDate,
    pub finalize: Option<Finalize>,
}

impl SyncTarget {
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>, epoch: NaiveDate, until: NaiveDate) -> Self {
        SyncTarget {
            key: key.into(),
            path: path.into(),
            merge_key: DEFAULT_DATE_COLUMN.to_string(),
            epoch,
            until,
            finalize: None,
        }
    }

    pub fn merge_key(mut self, column: impl Into<String>) -> Self {
        self.merge_key = column.into();
        self
    }

    pub fn finalize_with(mut self, finalize: Finalize) -> Self {
        self.finalize = Some(finalize);
        self
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.key.clone())
    }
}

/// What a successful sync did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// No file existed; the full history was written.
    Created {
        rows: usize,
        first: NaiveDate,
        last: NaiveDate,
    },
    /// The file already holds the latest remote data. Nothing was written.
    Skipped { latest: NaiveDate },
    /// New rows were merged into the existing file.
    Updated { appended: usize, latest: NaiveDate },
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::Created { rows, first, last } => {
                write!(f, "created with {} rows ({} to {})", rows, first, last)
            }
            SyncOutcome::Skipped { latest } => {
                write!(f, "skipped, already up to date through {}", latest)
            }
            SyncOutcome::Updated { appended, latest } => {
                write!(f, "updated with {} new rows through {}", appended, latest)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The remote call failed, after whatever retries the caller applied.
    #[error("fetch failed: {0}")]
    Fetch(#[source] FetchError),

    /// The fetch succeeded but returned nothing usable. Either the series
    /// has reached its end date or the source has not published yet; the
    /// two cannot be told apart here, so this is reported as-is.
    #[error(
        "No new data for {key}{}; the series may have reached its end date",
        .after.map(|d| format!(" after {}", d)).unwrap_or_default()
    )]
    NoNewData { key: String, after: Option<NaiveDate> },

    /// Local read/write failure while merging.
    #[error("merge failed: {0}")]
    Merge(#[from] StoreError),
}

/// A failed sync. `existing` is true when a dataset file was already on
/// disk; it has been left (or put back) exactly as it was.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SyncFailure {
    #[source]
    pub error: SyncError,
    pub existing: bool,
}

impl SyncFailure {
    fn kept(error: SyncError) -> Self {
        SyncFailure { error, existing: true }
    }
}

/// Brings `target` up to date.
///
/// `fetch(date_min, date_max)` returns the remote rows for an inclusive date
/// range. `is_latest(latest)` answers, without a full fetch, whether the
/// remote has nothing newer than `latest`.
pub fn sync<F, L>(target: &SyncTarget, mut fetch: F, mut is_latest: L) -> Result<SyncOutcome, SyncFailure>
where
    F: FnMut(NaiveDate, NaiveDate) -> Result<TimeSeries, FetchError>,
    L: FnMut(NaiveDate) -> Result<bool, FetchError>,
{
    let latest = store::latest_date(&target.path, &target.merge_key).map_err(|e| SyncFailure {
        error: SyncError::Merge(e),
        existing: target.path.exists(),
    })?;

    match latest {
        None => create(target, &mut fetch),
        Some(latest) => update(target, latest, &mut fetch, &mut is_latest),
    }
}

fn create<F>(target: &SyncTarget, fetch: &mut F) -> Result<SyncOutcome, SyncFailure>
where
    F: FnMut(NaiveDate, NaiveDate) -> Result<TimeSeries, FetchError>,
{
    logging::info(
        DataSource::File,
        Some(&target.key),
        &format!("Getting all data from {} to {}", target.epoch, target.until),
    );

    // A header-only file has no latest date but is still on disk.
    let existing = target.path.exists();
    let failed = |error: SyncError| SyncFailure { error, existing };

    let mut series = fetch(target.epoch, target.until).map_err(|e| failed(SyncError::Fetch(e)))?;
    series.date_column = target.merge_key.clone();
    series.normalize();

    let (Some(first), Some(last)) = (series.first_date(), series.last_date()) else {
        return Err(failed(SyncError::NoNewData {
            key: target.key.clone(),
            after: None,
        }));
    };

    if let Some(finalize) = target.finalize {
        finalize(&mut series).map_err(|e| failed(e.into()))?;
    }
    store::write_atomic(&target.path, &series).map_err(|e| failed(e.into()))?;

    Ok(SyncOutcome::Created {
        rows: series.len(),
        first,
        last,
    })
}

fn update<F, L>(
    target: &SyncTarget,
    latest: NaiveDate,
    fetch: &mut F,
    is_latest: &mut L,
) -> Result<SyncOutcome, SyncFailure>
where
    F: FnMut(NaiveDate, NaiveDate) -> Result<TimeSeries, FetchError>,
    L: FnMut(NaiveDate) -> Result<bool, FetchError>,
{
    // Closed series: nothing after `until` is ever requested.
    if latest >= target.until {
        return Ok(SyncOutcome::Skipped { latest });
    }
    if is_latest(latest).map_err(|e| SyncFailure::kept(SyncError::Fetch(e)))? {
        return Ok(SyncOutcome::Skipped { latest });
    }

    let from = latest.succ_opt().unwrap_or(latest);
    logging::info(
        DataSource::File,
        Some(&target.key),
        &format!("Downloading new data starting from {}", from),
    );

    let mut fresh = fetch(from, target.until).map_err(|e| SyncFailure::kept(SyncError::Fetch(e)))?;
    fresh.retain_after(latest);
    fresh.normalize();
    if fresh.is_empty() {
        return Err(SyncFailure::kept(SyncError::NoNewData {
            key: target.key.clone(),
            after: Some(latest),
        }));
    }

    let appended = fresh.len();
    let merged = replace(target, &fresh).map_err(|e| SyncFailure::kept(e.into()))?;

    Ok(SyncOutcome::Updated {
        appended,
        latest: merged.last_date().unwrap_or(latest),
    })
}

/// Merges `fresh` into the file at `target.path` under a [`ReplaceGuard`].
fn replace(target: &SyncTarget, fresh: &TimeSeries) -> Result<TimeSeries, StoreError> {
    let guard = ReplaceGuard::begin(&target.path)?;

    let original = store::read(guard.backup(), &target.merge_key)?;
    let mut merged = TimeSeries::merge(&original, fresh);
    if let Some(finalize) = target.finalize {
        finalize(&mut merged)?;
    }
    store::write_atomic(&target.path, &merged)?;

    guard.commit();
    Ok(merged)
}

// ---------------------------------------------------------------------------
// Scoped replace
// ---------------------------------------------------------------------------

/// Holds a dataset file moved aside under a unique temporary name.
///
/// `commit` deletes the backup. Dropping the guard without committing
/// removes whatever now sits at the canonical path and moves the backup
/// back, on every exit path including early returns and panics.
pub struct ReplaceGuard {
    target: PathBuf,
    backup: PathBuf,
    committed: bool,
}

impl ReplaceGuard {
    pub fn begin(target: &Path) -> Result<Self, StoreError> {
        let backup = store::sibling_path(target, &uuid::Uuid::new_v4().to_string());
        fs::rename(target, &backup).map_err(|source| StoreError::Io {
            path: target.to_path_buf(),
            source,
        })?;
        Ok(ReplaceGuard {
            target: target.to_path_buf(),
            backup,
            committed: false,
        })
    }

    pub fn backup(&self) -> &Path {
        &self.backup
    }

    pub fn commit(mut self) {
        self.committed = true;
        if let Err(e) = fs::remove_file(&self.backup) {
            logging::warn(
                DataSource::File,
                None,
                &format!("could not remove backup {}: {}", self.backup.display(), e),
            );
        }
    }
}

impl Drop for ReplaceGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if self.target.exists() {
            let removed = if self.target.is_dir() {
                fs::remove_dir(&self.target)
            } else {
                fs::remove_file(&self.target)
            };
            if let Err(e) = removed {
                logging::error(
                    DataSource::File,
                    None,
                    &format!("could not remove partial {}: {}", self.target.display(), e),
                );
            }
        }
        if let Err(e) = fs::rename(&self.backup, &self.target) {
            logging::error(
                DataSource::File,
                None,
                &format!(
                    "could not restore {} from {}: {}",
                    self.target.display(),
                    self.backup.display(),
                    e
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn daily(from: NaiveDate, to: NaiveDate) -> TimeSeries {
        let mut series = TimeSeries::new(["L OKEE_STG_ft NGVD29"]);
        let mut day = from;
        while day <= to {
            series.push(day, vec![Some(12.0)]);
            day = day.succ_opt().unwrap();
        }
        series
    }

    #[test]
    fn test_guard_restores_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LO_Stage.csv");
        fs::write(&path, "date,v\n2023-01-01,1\n").unwrap();

        {
            let guard = ReplaceGuard::begin(&path).unwrap();
            assert!(!path.exists());
            assert!(guard.backup().exists());
            fs::write(&path, "partial").unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "date,v\n2023-01-01,1\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_guard_commit_removes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LO_Stage.csv");
        fs::write(&path, "date,v\n").unwrap();

        let guard = ReplaceGuard::begin(&path).unwrap();
        fs::write(&path, "date,v\n2023-01-02,2\n").unwrap();
        guard.commit();

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        assert!(fs::read_to_string(&path).unwrap().contains("2023-01-02"));
    }

    #[test]
    fn test_failed_fetch_over_header_only_file_counts_as_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LO_Stage.csv");
        fs::write(&path, "date,L OKEE_STG_ft NGVD29\n").unwrap();

        let target = SyncTarget::new("LO_Stage", &path, d("2023-01-01"), d("2023-01-10"));
        let failure = sync(&target, |_, _| Err(FetchError::Http(503)), |_| Ok(false)).unwrap_err();

        assert!(failure.existing);
        assert!(matches!(failure.error, SyncError::Fetch(FetchError::Http(503))));
        assert_eq!(fs::read_to_string(&path).unwrap(), "date,L OKEE_STG_ft NGVD29\n");
    }

    #[test]
    fn test_closed_series_skips_without_calling_remote() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Stg_3A3.csv");
        fs::write(&path, "date,v\n2023-04-30,1\n").unwrap();

        let target = SyncTarget::new("Stg_3A3", &path, d("1972-01-01"), d("2023-04-30"));
        let outcome = sync(
            &target,
            |_, _| panic!("fetch must not be called"),
            |_| panic!("is_latest must not be called"),
        )
        .unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped { latest: d("2023-04-30") });
    }

    #[test]
    fn test_first_sync_with_empty_fetch_reports_no_data_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LO_Stage.csv");
        let target = SyncTarget::new("LO_Stage", &path, d("2023-01-01"), d("2023-01-10"));

        let failure = sync(&target, |_, _| Ok(TimeSeries::new(["v"])), |_| Ok(false)).unwrap_err();
        assert!(!failure.existing);
        assert!(matches!(failure.error, SyncError::NoNewData { after: None, .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_incremental_fetch_requests_day_after_latest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LO_Stage.csv");
        let target = SyncTarget::new("LO_Stage", &path, d("2023-06-01"), d("2023-06-30"));
        sync(&target, |a, b| Ok(daily(a, b)), |_| Ok(false)).unwrap();

        let later = SyncTarget::new("LO_Stage", &path, d("2023-06-01"), d("2023-07-05"));
        let mut requested = None;
        let outcome = sync(
            &later,
            |a, b| {
                requested = Some((a, b));
                Ok(daily(a, b))
            },
            |_| Ok(false),
        )
        .unwrap();

        assert_eq!(requested, Some((d("2023-07-01"), d("2023-07-05"))));
        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                appended: 5,
                latest: d("2023-07-05")
            }
        );
    }

    #[test]
    fn test_overlapping_fetch_only_counts_new_dates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LO_Stage.csv");
        let target = SyncTarget::new("LO_Stage", &path, d("2023-06-01"), d("2023-06-30"));
        sync(&target, |a, b| Ok(daily(a, b)), |_| Ok(false)).unwrap();

        let later = SyncTarget::new("LO_Stage", &path, d("2023-06-01"), d("2023-07-02"));
        // Remote ignores date_min and resends everything since June 28th
        let outcome = sync(&later, |_, b| Ok(daily(d("2023-06-28"), b)), |_| Ok(false)).unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                appended: 2,
                latest: d("2023-07-02")
            }
        );
        let series = store::read(&path, "date").unwrap();
        assert!(series.is_strictly_ascending());
        assert_eq!(series.len(), 32);
    }

    #[test]
    fn test_is_latest_failure_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LO_Stage.csv");
        fs::write(&path, "date,v\n2023-01-01,1\n").unwrap();

        let target = SyncTarget::new("LO_Stage", &path, d("2023-01-01"), d("2023-02-01"));
        let failure = sync(
            &target,
            |_, _| panic!("fetch must not be called"),
            |_| Err(FetchError::Http(503)),
        )
        .unwrap_err();
        assert!(failure.existing);
        assert!(matches!(failure.error, SyncError::Fetch(FetchError::Http(503))));
        assert_eq!(fs::read_to_string(&path).unwrap(), "date,v\n2023-01-01,1\n");
    }

    #[test]
    fn test_no_new_data_message_mentions_end_date() {
        let err = SyncError::NoNewData {
            key: "L001".into(),
            after: Some(d("2023-07-05")),
        };
        assert_eq!(
            err.to_string(),
            "No new data for L001 after 2023-07-05; the series may have reached its end date"
        );
    }
}

//! Date-indexed CSV dataset files.
//!
//! Every dataset the toolkit produces is a flat CSV with one date column and
//! one or more numeric value columns. This module owns reading, writing and
//! merging those files; it knows nothing about where the values came from.
//!
//! Missing values are read from empty cells, `NA` and `NaN`, and are written
//! back as empty cells. An unnamed leading index column (as left behind by
//! pandas-era files) is tolerated on read and dropped.

use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the date column used by every dataset file unless configured otherwise.
pub const DEFAULT_DATE_COLUMN: &str = "date";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{} has no '{column}' column", path.display())]
    MissingColumn { path: PathBuf, column: String },

    #[error("{} line {line}: invalid date '{value}'", path.display())]
    InvalidDate {
        path: PathBuf,
        line: u64,
        value: String,
    },

    #[error("{} line {line}: invalid number '{value}' in column '{column}'", path.display())]
    InvalidValue {
        path: PathBuf,
        line: u64,
        column: String,
        value: String,
    },

    #[error("{0}")]
    Rejected(String),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_error(path: &Path) -> impl FnOnce(csv::Error) -> StoreError + '_ {
    move |source| StoreError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How the date column is rendered when a file is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateLayout {
    /// `2023-07-01`
    #[default]
    Date,
    /// `2023-07-01 00:00:00` (water-quality files)
    Midnight,
}

impl DateLayout {
    pub fn format(&self, date: NaiveDate) -> String {
        match self {
            DateLayout::Date => date.format("%Y-%m-%d").to_string(),
            DateLayout::Midnight => date.format("%Y-%m-%d 00:00:00").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub date: NaiveDate,
    pub values: Vec<Option<f64>>,
}

/// An in-memory dataset: a date column plus named value columns.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub date_column: String,
    pub layout: DateLayout,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl TimeSeries {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        TimeSeries {
            date_column: DEFAULT_DATE_COLUMN.to_string(),
            layout: DateLayout::Date,
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn with_layout(mut self, layout: DateLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Appends a row. Missing trailing values are padded with `None`.
    pub fn push(&mut self, date: NaiveDate, mut values: Vec<Option<f64>>) {
        values.resize(self.columns.len(), None);
        self.rows.push(Row { date, values });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|r| r.date).min()
    }

    /// Latest date present, regardless of row order.
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|r| r.date).max()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(|r| r.date).collect()
    }

    /// Replaces the named column, or appends it if absent. `values` must
    /// line up with `rows`.
    pub fn set_column(&mut self, name: &str, values: Vec<Option<f64>>) {
        debug_assert_eq!(values.len(), self.rows.len());
        let idx = match self.column_index(name) {
            Some(idx) => idx,
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.values.push(None);
                }
                self.columns.len() - 1
            }
        };
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.values[idx] = value;
        }
    }

    /// Sorts rows by date and collapses duplicate dates, keeping the row
    /// that appeared last.
    pub fn normalize(&mut self) {
        self.rows.sort_by_key(|r| r.date); // stable: later rows stay later
        let mut out: Vec<Row> = Vec::with_capacity(self.rows.len());
        for row in self.rows.drain(..) {
            match out.last_mut() {
                Some(last) if last.date == row.date => *last = row,
                _ => out.push(row),
            }
        }
        self.rows = out;
    }

    pub fn is_strictly_ascending(&self) -> bool {
        self.rows.windows(2).all(|w| w[0].date < w[1].date)
    }

    /// Keeps only rows dated strictly after `date`.
    pub fn retain_after(&mut self, date: NaiveDate) {
        self.rows.retain(|r| r.date > date);
    }

    /// Combines an existing series with newly fetched rows.
    ///
    /// Columns are the union of both (existing order first). On a date
    /// present in both, the newer row wins. The result is sorted ascending
    /// with unique dates and keeps `original`'s date column and layout.
    pub fn merge(original: &TimeSeries, newer: &TimeSeries) -> TimeSeries {
        let mut columns = original.columns.clone();
        for column in &newer.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }

        let remap = |series: &TimeSeries| -> Vec<Row> {
            let targets: Vec<usize> = series
                .columns
                .iter()
                .map(|c| columns.iter().position(|m| m == c).unwrap_or_default())
                .collect();
            series
                .rows
                .iter()
                .map(|row| {
                    let mut values = vec![None; columns.len()];
                    for (src, &dst) in targets.iter().enumerate() {
                        values[dst] = row.values.get(src).copied().flatten();
                    }
                    Row {
                        date: row.date,
                        values,
                    }
                })
                .collect()
        };

        let mut rows = remap(original);
        rows.extend(remap(newer));

        let mut merged = TimeSeries {
            date_column: original.date_column.clone(),
            layout: original.layout,
            columns,
            rows,
        };
        merged.normalize();
        merged
    }

    // -----------------------------------------------------------------------
    // CSV encoding
    // -----------------------------------------------------------------------

    /// Parses CSV text. `origin` is only used in error messages.
    pub fn from_reader<R: io::Read>(
        reader: R,
        date_column: &str,
        origin: &Path,
    ) -> Result<TimeSeries, StoreError> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr.headers().map_err(csv_error(origin))?.clone();

        let date_idx = headers
            .iter()
            .position(|h| h.trim() == date_column)
            .ok_or_else(|| StoreError::MissingColumn {
                path: origin.to_path_buf(),
                column: date_column.to_string(),
            })?;

        // (csv index, column name) for every value column we keep
        let value_cols: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, h)| *i != date_idx && !is_index_header(h))
            .map(|(i, h)| (i, h.trim().to_string()))
            .collect();

        let mut series = TimeSeries {
            date_column: date_column.to_string(),
            layout: DateLayout::Date,
            columns: value_cols.iter().map(|(_, name)| name.clone()).collect(),
            rows: Vec::new(),
        };

        for (n, record) in rdr.records().enumerate() {
            let record = record.map_err(csv_error(origin))?;
            let line = record.position().map(|p| p.line()).unwrap_or(n as u64 + 2);
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }

            let raw_date = record.get(date_idx).unwrap_or("").trim();
            let (date, has_time) = parse_date(raw_date).ok_or_else(|| StoreError::InvalidDate {
                path: origin.to_path_buf(),
                line,
                value: raw_date.to_string(),
            })?;
            if series.rows.is_empty() && has_time {
                series.layout = DateLayout::Midnight;
            }

            let mut values = Vec::with_capacity(value_cols.len());
            for (idx, name) in &value_cols {
                let cell = record.get(*idx).unwrap_or("");
                let value = parse_value(cell).ok_or_else(|| StoreError::InvalidValue {
                    path: origin.to_path_buf(),
                    line,
                    column: name.clone(),
                    value: cell.to_string(),
                })?;
                values.push(value);
            }
            series.rows.push(Row { date, values });
        }

        Ok(series)
    }

    pub fn parse_str(text: &str, date_column: &str) -> Result<TimeSeries, StoreError> {
        Self::from_reader(text.as_bytes(), date_column, Path::new("<memory>"))
    }

    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push(self.date_column.as_str());
        header.extend(self.columns.iter().map(String::as_str));
        wtr.write_record(&header)?;

        for row in &self.rows {
            let mut record = Vec::with_capacity(row.values.len() + 1);
            record.push(self.layout.format(row.date));
            record.extend(row.values.iter().map(|v| format_value(*v)));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String, csv::Error> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn is_index_header(header: &str) -> bool {
    let h = header.trim();
    h.is_empty() || h.starts_with("Unnamed:")
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` and the `T`-separated form.
/// The boolean reports whether a time component was present.
pub fn parse_date(raw: &str) -> Option<(NaiveDate, bool)> {
    let raw = raw.trim().trim_matches('"');
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some((date, false));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some((dt.date(), true));
        }
    }
    None
}

/// `Some(None)` for a missing cell, `None` for something that isn't a number.
fn parse_value(cell: &str) -> Option<Option<f64>> {
    let cell = cell.trim().trim_matches('"');
    match cell {
        "" | "NA" | "NaN" | "nan" | "null" => Some(None),
        _ => cell.parse::<f64>().ok().map(|v| v.is_finite().then_some(v)),
    }
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => v.to_string(),
        _ => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

pub fn read(path: &Path, date_column: &str) -> Result<TimeSeries, StoreError> {
    let file = fs::File::open(path).map_err(io_error(path))?;
    TimeSeries::from_reader(io::BufReader::new(file), date_column, path)
}

/// Latest date recorded in a dataset file.
///
/// `None` when the file does not exist or holds no data rows; either way the
/// next sync does a full download.
pub fn latest_date(path: &Path, date_column: &str) -> Result<Option<NaiveDate>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(read(path, date_column)?.last_date())
}

/// A sibling of `path` named `<stem>_<tag>.<ext>`.
pub fn sibling_path(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, tag, ext.to_string_lossy()),
        None => format!("{}_{}", stem, tag),
    };
    path.with_file_name(name)
}

/// Writes `series` next to `path` and renames it into place, so readers
/// never observe a half-written dataset.
pub fn write_atomic(path: &Path, series: &TimeSeries) -> Result<(), StoreError> {
    write_atomic_with(path, |w| series.write_to(w))
}

/// Runs `write` against a sibling temp file and renames it over `path` on
/// success. On any failure the temp file is removed and `path` is untouched.
pub fn write_atomic_with<F>(path: &Path, write: F) -> Result<(), StoreError>
where
    F: FnOnce(io::BufWriter<fs::File>) -> Result<(), csv::Error>,
{
    let tmp = sibling_path(path, &format!("{}.partial", uuid::Uuid::new_v4()));

    let result = fs::File::create(&tmp)
        .map_err(io_error(&tmp))
        .and_then(|file| write(io::BufWriter::new(file)).map_err(csv_error(&tmp)))
        .and_then(|_| fs::rename(&tmp, path).map_err(io_error(path)));

    if result.is_err() && tmp.exists() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

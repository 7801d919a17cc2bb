//! Numeric post-processing of downloaded datasets.
//!
//! These routines turn the raw daily files into the derived inputs the
//! lake model reads: gap-free daily water-quality series, wave and current
//! bottom shear stress, water viscosity, and stage lookups.
//!
//! Submodules:
//! - `interpolate`: daily linear interpolation of sparse samples
//! - `physics`: wind waves, shear stress, viscosity, stage tables

pub mod interpolate;
pub mod physics;

use std::fs;
use std::path::Path;

use crate::store::StoreError;

/// Reads one numeric column from a CSV file by header name. Empty, `NA`
/// and `NaN` cells are `None`.
pub(crate) fn read_column(path: &Path, column: &str) -> Result<Vec<Option<f64>>, StoreError> {
    let file = fs::File::open(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let csv_error = |source| StoreError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let idx = rdr
        .headers()
        .map_err(csv_error)?
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| StoreError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })?;

    let mut values = Vec::new();
    for (n, record) in rdr.records().enumerate() {
        let record = record.map_err(csv_error)?;
        let cell = record.get(idx).unwrap_or("").trim();
        let value = match cell {
            "" | "NA" | "NaN" | "nan" => None,
            _ => Some(cell.parse::<f64>().map_err(|_| StoreError::InvalidValue {
                path: path.to_path_buf(),
                line: n as u64 + 2,
                column: column.to_string(),
                value: cell.to_string(),
            })?),
        };
        values.push(value);
    }
    Ok(values)
}

//! Weekly Palmer drought index for the lake's climate division.
//!
//! `PI.csv` is the NCEI table as published, replaced wholesale on every
//! run; a failed download leaves the previous file in place.

use std::path::Path;

use super::Context;
use crate::ingest::ncei::{self, CsvTable};
use crate::ingest::FetchError;
use crate::logging::{self, DataSource};
use crate::report::RunResult;
use crate::store::{self, StoreError};

pub const PALMER_INDEX_FILE: &str = "PI.csv";

#[derive(Debug, thiserror::Error)]
pub enum PalmerIndexError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn write_palmer_index(path: &Path, table: &CsvTable) -> Result<(), StoreError> {
    store::write_atomic_with(path, |w| ncei::write_table(w, table))
}

/// Downloads the index under the retry policy and replaces `PI.csv`.
/// Returns the number of weeks written.
pub fn palmer_index(ctx: &Context) -> Result<usize, PalmerIndexError> {
    let table = ctx.retry(DataSource::Ncei, "Palmer drought index", || {
        ncei::fetch_palmer_index(&ctx.client, &ctx.endpoints.ncei_palmer, ncei::LAKE_DIVISION)
    })?;
    write_palmer_index(&ctx.path(PALMER_INDEX_FILE), &table)?;
    Ok(table.records.len())
}

pub fn run_palmer_index(ctx: &Context) -> RunResult {
    match palmer_index(ctx) {
        Ok(weeks) => {
            logging::info(
                DataSource::Ncei,
                Some(PALMER_INDEX_FILE),
                &format!("wrote {} weeks", weeks),
            );
            RunResult::Success("Completed Palmer drought index download.".to_string())
        }
        Err(e) => {
            logging::error(DataSource::Ncei, Some(PALMER_INDEX_FILE), &e.to_string());
            RunResult::Error(format!("The following files could not be downloaded: ['{}']", PALMER_INDEX_FILE))
        }
    }
}

/// Batch result aggregation
///
/// Every dataset family runs many syncs in a row. A `BatchReport` collects
/// each dataset's outcome so that nothing is dropped silently: files that
/// never came into existence are listed as "could not be downloaded", files
/// that exist but failed to update are listed as "could not be updated".

use serde::Serialize;

use crate::logging::{self, DataSource};
use crate::sync::{SyncFailure, SyncOutcome};

/// Final result of one batch, printed by the CLI as
/// `{"success": "..."}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunResult {
    #[serde(rename = "success")]
    Success(String),
    #[serde(rename = "error")]
    Error(String),
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Success(_))
    }

    pub fn message(&self) -> &str {
        match self {
            RunResult::Success(m) | RunResult::Error(m) => m,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"error\": {:?}}}", self.message()))
    }
}

#[derive(Debug)]
pub struct BatchReport {
    label: String,
    source: DataSource,
    outcomes: Vec<(String, SyncOutcome)>,
    missing_files: Vec<String>,
    failed_updates: Vec<String>,
    errors: Vec<String>,
}

impl BatchReport {
    /// `label` names the batch in messages, e.g. "water level data".
    pub fn new(label: &str, source: DataSource) -> Self {
        BatchReport {
            label: label.to_string(),
            source,
            outcomes: Vec::new(),
            missing_files: Vec::new(),
            failed_updates: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Records one dataset's sync result and logs it.
    pub fn record(&mut self, file_name: &str, result: Result<SyncOutcome, SyncFailure>) {
        match result {
            Ok(outcome) => {
                logging::info(self.source.clone(), Some(file_name), &outcome.to_string());
                self.outcomes.push((file_name.to_string(), outcome));
            }
            Err(failure) => {
                let operation = if failure.existing { "update" } else { "download" };
                logging::log_sync_failure(self.source.clone(), file_name, operation, &failure);
                if failure.existing {
                    self.failed_updates.push(file_name.to_string());
                } else {
                    self.missing_files.push(file_name.to_string());
                }
            }
        }
    }

    /// A file that was expected but never produced, outside of a sync.
    pub fn add_missing(&mut self, file_name: &str) {
        self.missing_files.push(file_name.to_string());
    }

    /// A post-processing step failed (datum conversion, station averages, ...).
    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        logging::error(self.source.clone(), None, &message);
        self.errors.push(message);
    }

    pub fn outcomes(&self) -> &[(String, SyncOutcome)] {
        &self.outcomes
    }

    pub fn missing_files(&self) -> &[String] {
        &self.missing_files
    }

    pub fn failed_updates(&self) -> &[String] {
        &self.failed_updates
    }

    pub fn is_clean(&self) -> bool {
        self.missing_files.is_empty() && self.failed_updates.is_empty() && self.errors.is_empty()
    }

    pub fn finish(self) -> RunResult {
        let total = self.outcomes.len() + self.missing_files.len() + self.failed_updates.len();
        logging::log_batch_summary(
            self.source.clone(),
            &self.label,
            total,
            self.outcomes.len(),
            total - self.outcomes.len(),
        );

        if self.is_clean() {
            return RunResult::Success(format!("Completed {} download.", self.label));
        }

        let mut parts = Vec::new();
        if !self.missing_files.is_empty() {
            parts.push(format!(
                "The following files could not be downloaded: {}",
                quoted_list(&self.missing_files)
            ));
        }
        if !self.failed_updates.is_empty() {
            parts.push(format!(
                "The following files could not be updated: {}",
                quoted_list(&self.failed_updates)
            ));
        }
        parts.extend(self.errors);
        RunResult::Error(parts.join("\n"))
    }
}

fn quoted_list(items: &[String]) -> String {
    let inner: Vec<String> = items.iter().map(|s| format!("'{}'", s)).collect();
    format!("[{}]", inner.join(", "))
}

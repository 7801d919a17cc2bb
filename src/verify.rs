//! Workspace Verification Module
//!
//! Checks every dataset file the registry expects in a workspace: that it
//! exists, parses, keeps its dates sorted and unique, and how far its
//! latest row lags behind a reference date.
//!
//! Use this after a batch run, or before handing a workspace to the model.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::config::Registry;
use crate::datasets::{flow, water_level, water_quality, weather};
use crate::store::{self, DEFAULT_DATE_COLUMN};

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub reference_date: NaiveDate,
    pub max_age_days: i64,
    pub datasets: Vec<DatasetVerification>,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub current: usize,
    pub stale: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetVerification {
    pub family: String,
    pub file: String,
    pub status: VerificationStatus,
    pub exists: bool,
    pub rows: usize,
    pub latest_date: Option<NaiveDate>,
    pub days_behind: Option<i64>,
    pub sorted_unique: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

// ============================================================================
// Expected files
// ============================================================================

/// `(family, file name)` for every dataset the registry maintains.
///
/// Flow files are named after stations that only the remote metadata
/// knows, so they are discovered from the workspace instead.
pub fn expected_files(registry: &Registry, workspace: &Path) -> Vec<(&'static str, String)> {
    let mut files = Vec::new();

    for dataset in &registry.water_level {
        files.push(("water level", water_level::file_name(dataset)));
    }

    for parameter in &registry.water_quality {
        for station in &parameter.station_ids {
            files.push(("water quality", water_quality::file_name(station, &parameter.name)));
        }
    }

    let mut flow_files: Vec<String> = fs::read_dir(workspace)
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(&flow::file_name("")))
        .collect();
    flow_files.sort();
    files.extend(flow_files.into_iter().map(|name| ("flow", name)));

    for parameter in &registry.weather.parameters {
        for station in &registry.weather.stations {
            if let Some(name) = weather::file_name(station, parameter) {
                files.push(("weather", name));
            }
        }
    }

    files
}

// ============================================================================
// Single file
// ============================================================================

pub fn verify_dataset(
    family: &str,
    path: &Path,
    reference_date: NaiveDate,
    max_age_days: i64,
) -> DatasetVerification {
    let mut result = DatasetVerification {
        family: family.to_string(),
        file: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        status: VerificationStatus::Failed,
        exists: path.exists(),
        rows: 0,
        latest_date: None,
        days_behind: None,
        sorted_unique: false,
        error_message: None,
    };

    if !result.exists {
        result.error_message = Some("File not found".to_string());
        return result;
    }

    let series = match store::read(path, DEFAULT_DATE_COLUMN) {
        Ok(series) => series,
        Err(e) => {
            result.error_message = Some(e.to_string());
            return result;
        }
    };

    result.rows = series.len();
    result.latest_date = series.last_date();
    result.days_behind = result.latest_date.map(|d| (reference_date - d).num_days());
    result.sorted_unique = series.is_strictly_ascending();

    if !result.sorted_unique {
        result.error_message = Some("Dates are not sorted and unique".to_string());
        return result;
    }

    result.status = match result.days_behind {
        Some(days) if days <= max_age_days => VerificationStatus::Success,
        Some(_) => VerificationStatus::PartialSuccess,
        None => {
            result.error_message = Some("No data rows".to_string());
            VerificationStatus::Failed
        }
    };

    result
}

// ============================================================================
// Full Verification Runner
// ============================================================================

pub fn run_verification(
    registry: &Registry,
    workspace: &Path,
    reference_date: NaiveDate,
    max_age_days: i64,
) -> VerificationReport {
    let mut report = VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        reference_date,
        max_age_days,
        datasets: Vec::new(),
        summary: VerificationSummary::default(),
    };

    for (family, file) in expected_files(registry, workspace) {
        let result = verify_dataset(family, &workspace.join(&file), reference_date, max_age_days);
        report.summary.total += 1;
        match result.status {
            VerificationStatus::Success => report.summary.current += 1,
            VerificationStatus::PartialSuccess => report.summary.stale += 1,
            VerificationStatus::Failed => report.summary.failed += 1,
        }
        report.datasets.push(result);
    }

    report
}

pub fn print_summary(report: &VerificationReport) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("📊 WORKSPACE VERIFICATION ({})", report.reference_date);
    println!("═══════════════════════════════════════════════════════════");
    println!();

    for result in &report.datasets {
        match result.status {
            VerificationStatus::Success => {
                println!("  ✓ {:<45} {} rows, latest {}",
                    result.file, result.rows,
                    result.latest_date.map(|d| d.to_string()).unwrap_or_default());
            }
            VerificationStatus::PartialSuccess => {
                println!("  ⚠ {:<45} {} days behind",
                    result.file, result.days_behind.unwrap_or_default());
            }
            VerificationStatus::Failed => {
                println!("  ✗ {:<45} {}",
                    result.file, result.error_message.as_deref().unwrap_or("Unknown"));
            }
        }
    }

    println!();
    println!("Current:  {}/{}", report.summary.current, report.summary.total);
    println!("Stale:    {} (older than {} days)", report.summary.stale, report.max_age_days);
    println!("Failed:   {}", report.summary.failed);
    println!("═══════════════════════════════════════════════════════════");
}

/// Structured logging for the LOONE data-prep toolkit
///
/// Provides context-rich logging with dataset identifiers, data source
/// tags, timestamps, and severity levels. Supports both console output
/// and file-based logging for unattended batch runs.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Dbhydro,
    Geoglows,
    OpenMeteo,
    Ncat,
    Ncei,
    File,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Dbhydro => write!(f, "DBHYDRO"),
            DataSource::Geoglows => write!(f, "GEOGLOWS"),
            DataSource::OpenMeteo => write!(f, "OPEN-METEO"),
            DataSource::Ncat => write!(f, "NCAT"),
            DataSource::Ncei => write!(f, "NCEI"),
            DataSource::File => write!(f, "FILE"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the series may have reached the end of its record
    Expected,
    /// Unexpected failure - service degradation, local I/O, or configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

fn global() -> MutexGuard<'static, Option<Logger>> {
    // A panic while logging must not silence every later message.
    LOGGER.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        *global() = Some(logger);
    }

    fn log(&self, level: LogLevel, source: &DataSource, dataset: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

        let dataset_part = dataset.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry = format!(
            "{} {} {}{}: {}",
            timestamp, level, source, dataset_part, message
        );

        if self.console_timestamps {
            match level {
                LogLevel::Error => eprintln!("{}", log_entry),
                LogLevel::Warning => eprintln!("   {}", log_entry),
                LogLevel::Info => eprintln!("   {}", message),
                LogLevel::Debug => eprintln!("   [DEBUG] {}", message),
            }
        } else {
            // stdout carries the JSON run result, so console logging stays on stderr
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", source, dataset_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", source, dataset_part, message),
                LogLevel::Info => eprintln!("   {}", message),
                LogLevel::Debug => {}
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn emit(level: LogLevel, source: DataSource, dataset: Option<&str>, message: &str) {
    if let Some(logger) = global().as_ref() {
        logger.log(level, &source, dataset, message);
    }
}

/// Log a general informational message
pub fn info(source: DataSource, dataset: Option<&str>, message: &str) {
    emit(LogLevel::Info, source, dataset, message);
}

/// Log a warning message
pub fn warn(source: DataSource, dataset: Option<&str>, message: &str) {
    emit(LogLevel::Warning, source, dataset, message);
}

/// Log an error message
pub fn error(source: DataSource, dataset: Option<&str>, message: &str) {
    emit(LogLevel::Error, source, dataset, message);
}

/// Log a debug message
pub fn debug(source: DataSource, dataset: Option<&str>, message: &str) {
    emit(LogLevel::Debug, source, dataset, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a dataset sync failure from its rendered error message.
pub fn classify_sync_failure(error_message: &str) -> FailureType {
    if error_message.contains("No new data") {
        // Either the series ended or the upstream hasn't published yet
        FailureType::Expected
    } else if error_message.contains("HTTP error")
        || error_message.contains("Request failed")
        || error_message.contains("Parse error")
    {
        FailureType::Unexpected
    } else if error_message.contains("I/O error") || error_message.contains("CSV error") {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

/// Classify a datum conversion failure
pub fn classify_conversion_failure(error_message: &str) -> FailureType {
    if error_message.contains("HTTP") || error_message.contains("timeout") {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a dataset sync failure with automatic classification
pub fn log_sync_failure(
    source: DataSource,
    dataset: &str,
    operation: &str,
    err: &dyn std::error::Error,
) {
    let error_msg = err.to_string();
    let failure_type = classify_sync_failure(&error_msg);

    let message = format!("{} failed [{}]: {}", operation, failure_type, error_msg);

    match failure_type {
        FailureType::Expected => warn(source, Some(dataset), &message),
        FailureType::Unexpected => error(source, Some(dataset), &message),
        FailureType::Unknown => warn(source, Some(dataset), &message),
    }
}

/// Log a NAVD88 → NGVD29 conversion failure
pub fn log_conversion_failure(station: &str, err: &dyn std::error::Error) {
    let error_msg = err.to_string();
    let failure_type = classify_conversion_failure(&error_msg);
    let message = format!("datum conversion failed [{}]: {}", failure_type, error_msg);

    match failure_type {
        FailureType::Expected => debug(DataSource::Ncat, Some(station), &message),
        FailureType::Unexpected => error(DataSource::Ncat, Some(station), &message),
        FailureType::Unknown => warn(DataSource::Ncat, Some(station), &message),
    }
}

// ---------------------------------------------------------------------------
// Batch Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a batch of dataset syncs
pub fn log_batch_summary(source: DataSource, label: &str, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "{} complete: {}/{} successful, {} failed",
        label, successful, total, failed
    );

    if failed == 0 {
        info(source, None, &message);
    } else if successful == 0 {
        error(source, None, &message);
    } else {
        warn(source, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_failure_classification() {
        let horizon = "No new data after 2023-07-05 for LO_Stage";
        assert_eq!(classify_sync_failure(horizon), FailureType::Expected);

        let http_error = "HTTP error: 500";
        assert_eq!(classify_sync_failure(http_error), FailureType::Unexpected);

        let io_error = "merge failed: I/O error: permission denied";
        assert_eq!(classify_sync_failure(io_error), FailureType::Unexpected);

        assert_eq!(classify_sync_failure("something odd"), FailureType::Unknown);
    }

    #[test]
    fn test_conversion_failure_classification() {
        assert_eq!(
            classify_conversion_failure("HTTP error: 503"),
            FailureType::Unexpected
        );
        assert_eq!(
            classify_conversion_failure("missing destOrthoht"),
            FailureType::Unknown
        );
    }

    #[test]
    fn test_data_source_tags() {
        assert_eq!(DataSource::Dbhydro.to_string(), "DBHYDRO");
        assert_eq!(DataSource::OpenMeteo.to_string(), "OPEN-METEO");
    }
}

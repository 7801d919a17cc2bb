/// Core data types for the LOONE data-prep toolkit.
///
/// This module defines the shared domain model imported by all other modules:
/// unit constants, vertical datums, and the normalized readings produced by
/// the `ingest` clients before the `datasets` adapters reshape them into CSV
/// layouts. It contains no logic beyond small conversions, and no I/O.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Unit conversions
// ---------------------------------------------------------------------------

/// Cubic feet per second to cubic meters per day.
pub const CFS_TO_CMD: f64 = 0.0283168466 * 86400.0;

/// International foot in meters.
pub const FEET_TO_METERS: f64 = 0.3048;

/// Cubic meters in one acre-foot.
pub const CUBIC_METERS_PER_ACRE_FOOT: f64 = 1233.48;

pub const SECONDS_IN_HOUR: f64 = 3600.0;
pub const HOURS_IN_DAY: f64 = 24.0;

/// Sentinel DBHYDRO uses for "no value recorded".
pub const DBHYDRO_MISSING_SENTINEL: f64 = -99999.0;

// ---------------------------------------------------------------------------
// Datum
// ---------------------------------------------------------------------------

/// Vertical datum a stage series is reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Datum {
    #[serde(rename = "NGVD29")]
    Ngvd29,
    #[serde(rename = "NAVD88")]
    Navd88,
}

impl Datum {
    pub fn as_str(&self) -> &'static str {
        match self {
            Datum::Ngvd29 => "NGVD29",
            Datum::Navd88 => "NAVD88",
        }
    }
}

impl std::fmt::Display for Datum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage gauge reports: lake stage against a datum, or raw gauge height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StageKind {
    #[default]
    #[serde(rename = "STG")]
    Stage,
    #[serde(rename = "GAGHT")]
    GaugeHeight,
}

impl StageKind {
    /// Type tag used in column headers.
    pub fn code(&self) -> &'static str {
        match self {
            StageKind::Stage => "STG",
            StageKind::GaugeHeight => "GAGHT",
        }
    }

    /// Units used in column headers.
    pub fn units(&self) -> &'static str {
        match self {
            StageKind::Stage => "ft NGVD29",
            StageKind::GaugeHeight => "feet",
        }
    }
}

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// One daily value from a DBHYDRO continuous time series.
///
/// `value` is `None` when DBHYDRO reported a sentinel or a flagged zero;
/// see `ingest::dbhydro::clean_value`.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyValue {
    pub dbkey: String,
    pub site_code: String,
    pub date: NaiveDate,
    pub value: Option<f64>,
    pub qualifier: String,
}

/// One laboratory result for a water-quality station.
///
/// Several samples may share a date; the water-quality adapter averages
/// them per day.
#[derive(Debug, Clone, PartialEq)]
pub struct WaterQualitySample {
    pub station: String,
    pub collected: NaiveDate,
    pub value: Option<f64>,
    pub units: String,
}

/// WGS84 position of a monitoring station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

pub fn feet_to_meters(feet: f64) -> f64 {
    feet * FEET_TO_METERS
}

pub fn meters_to_feet(meters: f64) -> f64 {
    meters / FEET_TO_METERS
}

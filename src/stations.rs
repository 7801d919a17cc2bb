/// Built-in dataset registry for Lake Okeechobee.
///
/// Defines the DBHYDRO dbkeys, water-quality test numbers, GEOGLOWS reaches
/// and interpolation targets that the LOONE model expects in its workspace.
/// These tables are the defaults behind `config::Registry`; a TOML registry
/// file replaces them table by table. Other modules should go through the
/// registry rather than reference these statics directly.

use crate::model::{Datum, Location, StageKind};

// ---------------------------------------------------------------------------
// Water level
// ---------------------------------------------------------------------------

/// One stage dataset, written to `<name>.csv`.
pub struct WaterLevelDataset {
    pub name: &'static str,
    pub dbkeys: &'static [&'static str],
    /// First date of a full download (`YYYY-MM-DD`). Defaults to 1950-01-01.
    pub date_min: Option<&'static str>,
    /// Last date ever requested. Set for gauges that were discontinued.
    pub date_max: Option<&'static str>,
    pub datum: Datum,
    pub kind: StageKind,
    /// DBHYDRO site code → site name written in the column header.
    pub override_site_codes: &'static [(&'static str, &'static str)],
}

pub static WATER_LEVEL_DATASETS: &[WaterLevelDataset] = &[
    WaterLevelDataset {
        name: "LO_Stage",
        dbkeys: &["16022", "12509", "12519", "16265", "15611"],
        date_min: None,
        date_max: None,
        datum: Datum::Ngvd29,
        kind: StageKind::Stage,
        override_site_codes: &[],
    },
    // Replacement gauge for L OKEE, reported in NAVD88; merged back into
    // LO_Stage after every run.
    WaterLevelDataset {
        name: "LO_Stage_2",
        dbkeys: &["94832"],
        date_min: Some("2024-04-30"),
        date_max: None,
        datum: Datum::Navd88,
        kind: StageKind::Stage,
        override_site_codes: &[],
    },
    WaterLevelDataset {
        name: "Stg_3ANW",
        dbkeys: &["LA369"],
        date_min: Some("1972-01-01"),
        date_max: Some("2023-04-30"),
        datum: Datum::Ngvd29,
        kind: StageKind::Stage,
        override_site_codes: &[("G3ANW", "3A-NW")],
    },
    WaterLevelDataset {
        name: "Stg_2A17",
        dbkeys: &["16531"],
        date_min: Some("1972-01-01"),
        date_max: Some("2023-04-30"),
        datum: Datum::Ngvd29,
        kind: StageKind::GaugeHeight,
        override_site_codes: &[("2A-17", "2-17")],
    },
    WaterLevelDataset {
        name: "Stg_3A3",
        dbkeys: &["16532"],
        date_min: Some("1972-01-01"),
        date_max: Some("2023-04-30"),
        datum: Datum::Ngvd29,
        kind: StageKind::GaugeHeight,
        override_site_codes: &[("3A-3", "3-63")],
    },
    WaterLevelDataset {
        name: "Stg_3A4",
        dbkeys: &["16537"],
        date_min: Some("1972-01-01"),
        date_max: Some("2023-04-30"),
        datum: Datum::Ngvd29,
        kind: StageKind::GaugeHeight,
        override_site_codes: &[("3A-4", "3-64")],
    },
    WaterLevelDataset {
        name: "Stg_3A28",
        dbkeys: &["16538"],
        date_min: Some("1972-01-01"),
        date_max: Some("2023-04-30"),
        datum: Datum::Ngvd29,
        kind: StageKind::GaugeHeight,
        override_site_codes: &[("3A-28", "3-65")],
    },
];

/// Station whose old and new gauges are stitched together.
pub const LAKE_STAGE_STATION: &str = "L OKEE";

// ---------------------------------------------------------------------------
// Water quality
// ---------------------------------------------------------------------------

/// In-lake water-quality sampling sites.
pub static LAKE_WQ_STATIONS: &[&str] = &["L001", "L004", "L005", "L006", "L007", "L008", "LZ40"];

/// DBHYDRO parameter name and its laboratory test number.
pub static WATER_QUALITY_PARAMETERS: &[(&str, u32)] = &[
    ("PHOSPHATE, TOTAL AS P", 25),
    ("PHOSPHATE, ORTHO AS P", 23),
    ("AMMONIA-N", 20),
    ("NITRATE+NITRITE-N", 18),
    ("TOTAL NITROGEN", 80),
    ("MICROCYSTIN HILR", 1023),
    ("MICROCYSTIN HTYR", 1022),
    ("MICROCYSTIN LA", 1005),
    ("MICROCYSTIN LF", 1006),
    ("MICROCYSTIN LR", 1007),
    ("MICROCYSTIN LW", 1008),
    ("MICROCYSTIN LY", 1009),
    ("MICROCYSTIN RR", 1010),
    ("MICROCYSTIN WR", 1011),
    ("MICROCYSTIN YR", 1012),
    ("CHLOROPHYLL-A", 61),
    ("CHLOROPHYLL-A(LC)", 179),
    ("CHLOROPHYLL-A, CORRECTED", 112),
    ("DISSOLVED OXYGEN", 8),
];

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// Daily flow dbkeys for the lake's outflow structures.
pub static OUTFLOW_DBKEYS: &[&str] = &[
    "91370", "91373", "91379", "91508", "91510", "91513", "91677", "15628", "15640", "15626",
    "00865", "JW224", "00436", "15018", "91606", "JW223",
];

pub const FLOW_DATE_MIN: &str = "2000-01-01";

/// The two S65E discharge records combined in `S65E_total.csv`. The series
/// is closed: it covers 1972-01-01 through 2023-06-30.
pub static S65E_TOTAL_DBKEYS: &[&str] = &["91656", "AL760"];

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

/// In-lake weather platforms. Their rain and ETPI records are also
/// averaged into the lake-wide files.
pub static WEATHER_STATIONS: &[&str] = WEATHER_PLATFORMS;

const WEATHER_PLATFORMS: &[&str] = &["L001", "L005", "L006", "LZ40"];

/// Daily rainfall dbkeys for the weather platforms.
pub static RAIN_DBKEYS: &[&str] = &["16021", "12515", "12524", "13081"];

pub const WEATHER_DATE_MIN: &str = "2000-01-01";

/// Units for a weather parameter as they appear in file names and headers.
pub struct WeatherUnits {
    pub parameter: &'static str,
    /// Empty for parameters whose file name carries no unit.
    pub file: &'static str,
    pub header: &'static str,
}

pub static WEATHER_UNITS: &[WeatherUnits] = &[
    WeatherUnits { parameter: "RAIN", file: "Inches", header: "Inches" },
    WeatherUnits { parameter: "ETPI", file: "Inches", header: "Inches" },
    WeatherUnits { parameter: "H2OT", file: "Degrees Celsius", header: "Degrees Celsius" },
    WeatherUnits { parameter: "RADP", file: "", header: "MICROMOLE/m^2/s" },
    WeatherUnits { parameter: "RADT", file: "", header: "kW/m^2" },
    WeatherUnits { parameter: "AIRT", file: "Degrees Celsius", header: "Degrees Celsius" },
    WeatherUnits { parameter: "WNDS", file: "MPH", header: "MPH" },
];

pub fn weather_units(parameter: &str) -> Option<&'static WeatherUnits> {
    WEATHER_UNITS.iter().find(|u| u.parameter == parameter)
}

// ---------------------------------------------------------------------------
// Forecasts
// ---------------------------------------------------------------------------

/// Structures whose GEOGLOWS flow forecasts feed the model.
pub static FORECAST_FLOW_STATIONS: &[&str] = &[
    "S191_S", "S65E_S", "S65EX1_S", "S84_S", "S154_C", "S71_S", "S72_S", "FISHP", "S308.DS",
    "L8.441", "S133_P", "S127_C", "S127_P", "S129_C", "S135_C", "S2_P", "S3_P", "S4_P", "S351_S",
    "S352_S", "S354_S", "S129 PMP_P", "S135 PMP_P", "S77_S", "INDUST", "S79_S", "S80_S", "S40_S",
    "S49_S",
];

/// GEOGLOWS reaches draining into the lake, summed for net inflow.
pub static INFLOW_REACH_IDS: &[u64] = &[
    750059718, 750043742, 750035446, 750034865, 750055574, 750053211, 750050248, 750065049,
    750064453, 750049661, 750069195, 750051436, 750068005, 750063868, 750069782, 750072741,
];

/// Point the weather forecast is taken at.
pub const LAKE_CENTROID: Location = Location {
    latitude: 26.9690,
    longitude: -80.7976,
};

pub const FORECAST_DAYS: u32 = 16;

// ---------------------------------------------------------------------------
// Interpolation
// ---------------------------------------------------------------------------

/// A parameter whose sparse samples are interpolated to a daily series.
pub struct InterpolationTarget {
    pub parameter: &'static str,
    pub units: &'static str,
    pub station_ids: &'static [&'static str],
}

const INFLOW_AND_LAKE_WQ: &[&str] = &[
    "S65E", "FECSR78", "CULV10A", "S71", "S72", "S84", "S127", "S133", "S135", "S154", "S191",
    "S308C", "S4", "L001", "L004", "L005", "L006", "L007", "L008", "LZ40",
];

pub static INTERPOLATION_TARGETS: &[InterpolationTarget] = &[
    InterpolationTarget { parameter: "PHOSPHATE, TOTAL AS P", units: "mg/L", station_ids: INFLOW_AND_LAKE_WQ },
    InterpolationTarget { parameter: "PHOSPHATE, ORTHO AS P", units: "mg/L", station_ids: LAKE_WQ_ONLY },
    InterpolationTarget { parameter: "NITRATE+NITRITE-N", units: "mg/L", station_ids: INFLOW_AND_LAKE_WQ },
    InterpolationTarget { parameter: "AMMONIA-N", units: "mg/L", station_ids: INFLOW_AND_LAKE_WQ },
    InterpolationTarget { parameter: "CHLOROPHYLL-A(LC)", units: "ug/L", station_ids: INFLOW_AND_LAKE_WQ },
    InterpolationTarget { parameter: "CHLOROPHYLL-A, CORRECTED", units: "ug/L", station_ids: INFLOW_AND_LAKE_WQ },
    InterpolationTarget { parameter: "DISSOLVED OXYGEN", units: "mg/L", station_ids: LAKE_WQ_ONLY },
    InterpolationTarget { parameter: "RADP", units: "MICROMOLE/m^2/s", station_ids: WEATHER_PLATFORMS },
    InterpolationTarget { parameter: "RADT", units: "kW/m^2", station_ids: WEATHER_PLATFORMS },
];

const LAKE_WQ_ONLY: &[&str] = &["L001", "L004", "L005", "L006", "L007", "L008", "LZ40"];

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

pub fn find_water_level_dataset(name: &str) -> Option<&'static WaterLevelDataset> {
    WATER_LEVEL_DATASETS.iter().find(|d| d.name == name)
}

pub fn water_quality_test_number(parameter: &str) -> Option<u32> {
    WATER_QUALITY_PARAMETERS
        .iter()
        .find(|(name, _)| *name == parameter)
        .map(|(_, n)| *n)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashSet;

    #[test]
    fn test_no_duplicate_dataset_names() {
        let mut seen = HashSet::new();
        for dataset in WATER_LEVEL_DATASETS {
            assert!(
                seen.insert(dataset.name),
                "duplicate dataset '{}' found in WATER_LEVEL_DATASETS",
                dataset.name
            );
        }
    }

    #[test]
    fn test_water_level_dates_are_valid_and_ordered() {
        for dataset in WATER_LEVEL_DATASETS {
            let parse = |s: &str| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .unwrap_or_else(|_| panic!("bad date '{}' on '{}'", s, dataset.name))
            };
            let min = dataset.date_min.map(parse);
            let max = dataset.date_max.map(parse);
            if let (Some(min), Some(max)) = (min, max) {
                assert!(min < max, "'{}' has date_min after date_max", dataset.name);
            }
        }
    }

    #[test]
    fn test_every_dataset_has_dbkeys() {
        for dataset in WATER_LEVEL_DATASETS {
            assert!(!dataset.dbkeys.is_empty(), "'{}' has no dbkeys", dataset.name);
        }
    }

    #[test]
    fn test_lake_stage_pair_is_present() {
        let old = find_water_level_dataset("LO_Stage").expect("LO_Stage should be in registry");
        let new = find_water_level_dataset("LO_Stage_2").expect("LO_Stage_2 should be in registry");
        assert_eq!(old.datum, Datum::Ngvd29);
        assert_eq!(new.datum, Datum::Navd88);
    }

    #[test]
    fn test_test_numbers_are_unique() {
        let mut seen = HashSet::new();
        for (name, number) in WATER_QUALITY_PARAMETERS {
            assert!(seen.insert(number), "test number {} reused by '{}'", number, name);
        }
        assert_eq!(water_quality_test_number("PHOSPHATE, TOTAL AS P"), Some(25));
        assert_eq!(water_quality_test_number("UNKNOWN"), None);
    }

    #[test]
    fn test_weather_units_cover_all_parameters() {
        for code in ["RAIN", "ETPI", "H2OT", "RADP", "RADT", "AIRT", "WNDS"] {
            assert!(weather_units(code).is_some(), "no units for '{}'", code);
        }
        assert_eq!(weather_units("RADP").map(|u| u.file), Some(""));
    }

    #[test]
    fn test_sixteen_distinct_inflow_reaches() {
        let unique: HashSet<_> = INFLOW_REACH_IDS.iter().collect();
        assert_eq!(unique.len(), 16);
    }

    #[test]
    fn test_interpolation_stations_are_not_repeated() {
        for target in INTERPOLATION_TARGETS {
            let unique: HashSet<_> = target.station_ids.iter().collect();
            assert_eq!(
                unique.len(),
                target.station_ids.len(),
                "duplicate station under '{}'",
                target.parameter
            );
        }
    }
}

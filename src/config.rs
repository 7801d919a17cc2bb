//! Run configuration: which datasets to maintain, where the services live,
//! and how hard to retry them.
//!
//! `Registry` defaults to the built-in tables in `stations`; a TOML file can
//! replace any of its tables:
//!
//! ```toml
//! [[water_level]]
//! name = "LO_Stage"
//! dbkeys = ["16022", "12509"]
//! datum = "NGVD29"
//!
//! [retry]
//! tries = 3
//! delay_secs = 5
//! max_delay_secs = 30
//! backoff = 2
//! ```
//!
//! `Endpoints` come from the environment (a `.env` file is honoured).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::model::{Datum, Location, StageKind};
use crate::retry::RetryPolicy;
use crate::stations;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Dataset tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterLevelConfig {
    pub name: String,
    pub dbkeys: Vec<String>,
    #[serde(default)]
    pub date_min: Option<NaiveDate>,
    #[serde(default)]
    pub date_max: Option<NaiveDate>,
    pub datum: Datum,
    #[serde(default)]
    pub kind: StageKind,
    #[serde(default)]
    pub override_site_codes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterQualityConfig {
    /// DBHYDRO parameter name, e.g. `PHOSPHATE, TOTAL AS P`.
    pub name: String,
    pub test_number: u32,
    pub station_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    pub dbkeys: Vec<String>,
    pub date_min: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Weather platforms, e.g. `L001`.
    pub stations: Vec<String>,
    /// Parameter codes, e.g. `RAIN`, `ETPI`.
    pub parameters: Vec<String>,
    /// Known dbkeys per parameter. Parameters without an entry are looked up
    /// by station in the DBHYDRO series catalogue.
    #[serde(default)]
    pub dbkeys: BTreeMap<String, Vec<String>>,
    pub date_min: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    pub flow_stations: Vec<String>,
    pub inflow_reach_ids: Vec<u64>,
    pub lake_centroid: Location,
    pub forecast_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationConfig {
    pub parameter: String,
    pub units: String,
    pub station_ids: Vec<String>,
}

/// Every dataset the toolkit maintains. Passed explicitly to each batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Registry {
    pub water_level: Vec<WaterLevelConfig>,
    pub water_quality: Vec<WaterQualityConfig>,
    pub flow: FlowConfig,
    pub weather: WeatherConfig,
    pub forecast: ForecastConfig,
    pub interpolation: Vec<InterpolationConfig>,
    pub retry: RetryPolicy,
}

fn builtin_date(s: &str) -> NaiveDate {
    // Built-in dates are checked by the stations tests.
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_default()
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Registry {
    fn default() -> Self {
        let water_level = stations::WATER_LEVEL_DATASETS
            .iter()
            .map(|d| WaterLevelConfig {
                name: d.name.to_string(),
                dbkeys: owned(d.dbkeys),
                date_min: d.date_min.map(builtin_date),
                date_max: d.date_max.map(builtin_date),
                datum: d.datum,
                kind: d.kind,
                override_site_codes: d
                    .override_site_codes
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
            .collect();

        let water_quality = stations::WATER_QUALITY_PARAMETERS
            .iter()
            .map(|(name, test_number)| WaterQualityConfig {
                name: name.to_string(),
                test_number: *test_number,
                station_ids: owned(stations::LAKE_WQ_STATIONS),
            })
            .collect();

        let interpolation = stations::INTERPOLATION_TARGETS
            .iter()
            .map(|t| InterpolationConfig {
                parameter: t.parameter.to_string(),
                units: t.units.to_string(),
                station_ids: owned(t.station_ids),
            })
            .collect();

        Registry {
            water_level,
            water_quality,
            flow: FlowConfig {
                dbkeys: owned(stations::OUTFLOW_DBKEYS),
                date_min: builtin_date(stations::FLOW_DATE_MIN),
            },
            weather: WeatherConfig {
                stations: owned(stations::WEATHER_STATIONS),
                parameters: stations::WEATHER_UNITS.iter().map(|u| u.parameter.to_string()).collect(),
                dbkeys: BTreeMap::from([("RAIN".to_string(), owned(stations::RAIN_DBKEYS))]),
                date_min: builtin_date(stations::WEATHER_DATE_MIN),
            },
            forecast: ForecastConfig {
                flow_stations: owned(stations::FORECAST_FLOW_STATIONS),
                inflow_reach_ids: stations::INFLOW_REACH_IDS.to_vec(),
                lake_centroid: stations::LAKE_CENTROID,
                forecast_days: stations::FORECAST_DAYS,
            },
            interpolation,
            retry: RetryPolicy::default(),
        }
    }
}

impl Registry {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let registry: Registry = toml::from_str(text)?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// The built-in registry, or the one at `path` when given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut names = std::collections::HashSet::new();
        for dataset in &self.water_level {
            if !names.insert(dataset.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "water level dataset '{}' is listed twice",
                    dataset.name
                )));
            }
            if dataset.dbkeys.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "water level dataset '{}' has no dbkeys",
                    dataset.name
                )));
            }
            if let (Some(min), Some(max)) = (dataset.date_min, dataset.date_max) {
                if min > max {
                    return Err(ConfigError::Invalid(format!(
                        "water level dataset '{}' has date_min {} after date_max {}",
                        dataset.name, min, max
                    )));
                }
            }
        }
        for parameter in &self.weather.parameters {
            if stations::weather_units(parameter).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "unknown weather parameter '{}'",
                    parameter
                )));
            }
        }
        Ok(())
    }

    pub fn water_level_dataset(&self, name: &str) -> Option<&WaterLevelConfig> {
        self.water_level.iter().find(|d| d.name == name)
    }
}

// ---------------------------------------------------------------------------
// Service endpoints
// ---------------------------------------------------------------------------

pub const DEFAULT_DBHYDRO_URL: &str = "https://insightsdata.api.sfwmd.gov/v1/insights-data";
pub const DEFAULT_SITE_STATION_URL: &str = "https://geoweb.sfwmd.gov/agsext2/rest/services/MonitoringLocations/DBHYDRO_SiteStation/MapServer/4/query";
pub const DEFAULT_GEOGLOWS_URL: &str = "https://geoglows.ecmwf.int/api";
pub const DEFAULT_OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const DEFAULT_NCAT_URL: &str = "https://geodesy.noaa.gov/api/ncat/llh";
pub const DEFAULT_NCEI_PALMER_URL: &str = "https://www.ncei.noaa.gov/access/monitoring/weekly-palmers";

/// Base URLs of the remote services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoints {
    pub dbhydro: String,
    pub site_station: String,
    pub geoglows: String,
    pub open_meteo: String,
    pub ncat: String,
    pub ncei_palmer: String,
    pub timeout_secs: u64,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            dbhydro: DEFAULT_DBHYDRO_URL.to_string(),
            site_station: DEFAULT_SITE_STATION_URL.to_string(),
            geoglows: DEFAULT_GEOGLOWS_URL.to_string(),
            open_meteo: DEFAULT_OPEN_METEO_URL.to_string(),
            ncat: DEFAULT_NCAT_URL.to_string(),
            ncei_palmer: DEFAULT_NCEI_PALMER_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl Endpoints {
    /// Reads overrides from `LOONE_DBHYDRO_URL`, `LOONE_SITE_STATION_URL`,
    /// `LOONE_GEOGLOWS_URL`, `LOONE_OPEN_METEO_URL`, `LOONE_NCAT_URL`,
    /// `LOONE_NCEI_PALMER_URL` and `LOONE_HTTP_TIMEOUT_SECS`, loading `.env`
    /// first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Endpoints::default();
        let pick = |key: &str, default: String| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .unwrap_or(default)
        };

        let timeout_secs = match lookup("LOONE_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("LOONE_HTTP_TIMEOUT_SECS must be a number, got '{}'", raw))
            })?,
            None => defaults.timeout_secs,
        };

        Ok(Endpoints {
            dbhydro: pick("LOONE_DBHYDRO_URL", defaults.dbhydro),
            site_station: pick("LOONE_SITE_STATION_URL", defaults.site_station),
            geoglows: pick("LOONE_GEOGLOWS_URL", defaults.geoglows),
            open_meteo: pick("LOONE_OPEN_METEO_URL", defaults.open_meteo),
            ncat: pick("LOONE_NCAT_URL", defaults.ncat),
            ncei_palmer: pick("LOONE_NCEI_PALMER_URL", defaults.ncei_palmer),
            timeout_secs,
        })
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_mirrors_builtin_tables() {
        let registry = Registry::default();
        assert_eq!(registry.water_level.len(), stations::WATER_LEVEL_DATASETS.len());
        let stg = registry.water_level_dataset("Stg_3A3").unwrap();
        assert_eq!(stg.date_max, NaiveDate::from_ymd_opt(2023, 4, 30));
        assert_eq!(stg.kind, StageKind::GaugeHeight);
        assert_eq!(stg.override_site_codes.get("3A-3").map(String::as_str), Some("3-63"));
        assert_eq!(registry.forecast.inflow_reach_ids.len(), 16);
        assert_eq!(registry.retry, RetryPolicy::default());
    }

    #[test]
    fn test_toml_replaces_only_the_tables_it_names() {
        let registry = Registry::from_toml_str(
            r#"
            [[water_level]]
            name = "LO_Stage"
            dbkeys = ["16022"]
            datum = "NGVD29"

            [retry]
            tries = 2
            delay_secs = 1
            max_delay_secs = 1
            backoff = 1
            "#,
        )
        .unwrap();
        assert_eq!(registry.water_level.len(), 1);
        assert_eq!(registry.water_level[0].kind, StageKind::Stage);
        assert_eq!(registry.retry.tries, 2);
        assert_eq!(registry.water_quality, Registry::default().water_quality);
    }

    #[test]
    fn test_example_registry_parses() {
        let registry = Registry::from_toml_str(include_str!("../registry.example.toml")).unwrap();
        assert_eq!(registry.water_level.len(), 3);
        assert_eq!(registry.water_level[1].datum, Datum::Navd88);
        assert_eq!(registry.weather.dbkeys["RAIN"].len(), 4);
        assert_eq!(registry.forecast.forecast_days, 16);
        assert_eq!(registry.interpolation[0].parameter, "RADP");
    }

    #[test]
    fn test_inverted_date_range_is_rejected() {
        let err = Registry::from_toml_str(
            r#"
            [[water_level]]
            name = "X"
            dbkeys = ["1"]
            datum = "NGVD29"
            date_min = "2023-01-01"
            date_max = "2022-01-01"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("after date_max"));
    }

    #[test]
    fn test_unknown_weather_parameter_is_rejected() {
        let err = Registry::from_toml_str(
            r#"
            [weather]
            stations = ["L001"]
            parameters = ["SNOW"]
            date_min = "2000-01-01"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_endpoint_overrides_trim_trailing_slash() {
        let endpoints = Endpoints::from_lookup(|key| match key {
            "LOONE_NCAT_URL" => Some("http://localhost:8080/ncat/".to_string()),
            "LOONE_HTTP_TIMEOUT_SECS" => Some("5".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(endpoints.ncat, "http://localhost:8080/ncat");
        assert_eq!(endpoints.dbhydro, DEFAULT_DBHYDRO_URL);
        assert_eq!(endpoints.ncei_palmer, DEFAULT_NCEI_PALMER_URL);
        assert_eq!(endpoints.timeout_secs, 5);
    }

    #[test]
    fn test_bad_timeout_is_an_error() {
        let result = Endpoints::from_lookup(|key| {
            (key == "LOONE_HTTP_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }
}

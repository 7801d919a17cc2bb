/// DBHYDRO Insights client
///
/// Retrieves daily continuous series (stage, flow, weather), laboratory
/// water-quality results and station metadata from the South Florida Water
/// Management District's DBHYDRO Insights services.
///
/// Query construction and response parsing are pure functions so they can be
/// tested against fixtures; the `fetch_*` functions only add the HTTP call.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::{send_text, FetchError};
use crate::model::{DailyValue, Datum, Location, WaterQualitySample, DBHYDRO_MISSING_SENTINEL};

// ============================================================================
// Response structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct DailyResponse {
    #[serde(default)]
    results: Vec<DailySeries>,
}

#[derive(Debug, Deserialize)]
struct DailySeries {
    #[serde(alias = "timeseriesId", alias = "dbKey")]
    dbkey: String,
    #[serde(alias = "siteCode", alias = "site", alias = "station")]
    site_code: String,
    #[serde(default)]
    data: Vec<DailyPoint>,
}

#[derive(Debug, Deserialize)]
struct DailyPoint {
    #[serde(alias = "dateTime", alias = "timestamp")]
    date: String,
    value: Option<f64>,
    #[serde(default, alias = "qualifer", alias = "code")]
    qualifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PeriodResponse {
    #[serde(default)]
    results: Vec<PeriodEntry>,
}

#[derive(Debug, Deserialize)]
struct PeriodEntry {
    #[serde(default, alias = "timeseriesId", alias = "dbKey")]
    dbkey: Option<String>,
    #[serde(default, alias = "stationId", alias = "station", alias = "location")]
    station: Option<String>,
    #[serde(default, alias = "startDate", alias = "firstDate", alias = "porStart")]
    start_date: Option<String>,
    #[serde(default, alias = "endDate", alias = "lastDate", alias = "porEnd")]
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChemResponse {
    #[serde(default)]
    results: Vec<ChemResult>,
}

#[derive(Debug, Deserialize)]
struct ChemResult {
    #[serde(alias = "stationId", alias = "location")]
    station: String,
    #[serde(alias = "dateCollected", alias = "collectionDate", alias = "date_collected_str")]
    date_collected: String,
    #[serde(alias = "sigFigValue", alias = "sig_fig_value", alias = "value")]
    sig_fig_value: serde_json::Value,
    #[serde(default)]
    units: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SiteStationResponse {
    #[serde(default)]
    features: Vec<SiteStationFeature>,
}

#[derive(Debug, Deserialize)]
struct SiteStationFeature {
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    geometry: Option<PointGeometry>,
}

#[derive(Debug, Deserialize)]
struct PointGeometry {
    x: f64,
    y: f64,
}

/// Period of record of one DBHYDRO series.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodOfRecord {
    pub dbkey: Option<String>,
    pub station: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

// ============================================================================
// Value cleaning
// ============================================================================

/// DBHYDRO marks missing days with a `-99999` sentinel, or with `0` flagged
/// `M` (missing) or `N` (not recorded). All of these become `None`.
pub fn clean_value(value: Option<f64>, qualifier: &str) -> Option<f64> {
    let value = value?;
    if !value.is_finite() || value == DBHYDRO_MISSING_SENTINEL {
        return None;
    }
    let flag = qualifier.trim();
    if value == 0.0 && (flag.eq_ignore_ascii_case("M") || flag.eq_ignore_ascii_case("N")) {
        return None;
    }
    Some(value)
}

/// Parses the date formats DBHYDRO emits: ISO dates/timestamps and the
/// legacy `01-JUL-2023` form.
pub fn parse_dbhydro_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some((date, _)) = crate::store::parse_date(raw) {
        return Some(date);
    }
    // 2023-07-01T00:00:00.000Z and similar
    if let Some(prefix) = raw.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }
    for fmt in ["%d-%b-%Y", "%Y%m%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(date);
        }
    }
    None
}

fn compact(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

// ============================================================================
// Daily continuous data
// ============================================================================

/// URL for daily values of `dbkeys` over an inclusive date range.
pub fn build_daily_url(
    base_url: &str,
    dbkeys: &[&str],
    date_min: NaiveDate,
    date_max: NaiveDate,
    datum: Datum,
) -> String {
    format!(
        "{}/cont/data?dbkeys={}&startDate={}&endDate={}&vertDatum={}&frequency=DA",
        base_url,
        dbkeys.join(","),
        compact(date_min),
        compact(date_max),
        datum
    )
}

/// Parses a daily-data response into cleaned values, one per series and day.
/// Points with unparseable dates are dropped.
pub fn parse_daily_response(body: &str) -> Result<Vec<DailyValue>, FetchError> {
    let response: DailyResponse = serde_json::from_str(body)?;
    let mut values = Vec::new();
    for series in response.results {
        for point in series.data {
            let Some(date) = parse_dbhydro_date(&point.date) else {
                continue;
            };
            let qualifier = point.qualifier.unwrap_or_default();
            values.push(DailyValue {
                dbkey: series.dbkey.clone(),
                site_code: series.site_code.trim().to_string(),
                date,
                value: clean_value(point.value, &qualifier),
                qualifier,
            });
        }
    }
    Ok(values)
}

pub fn fetch_daily(
    client: &reqwest::blocking::Client,
    base_url: &str,
    dbkeys: &[&str],
    date_min: NaiveDate,
    date_max: NaiveDate,
    datum: Datum,
) -> Result<Vec<DailyValue>, FetchError> {
    let url = build_daily_url(base_url, dbkeys, date_min, date_max, datum);
    let body = send_text(client.get(&url).header("Accept", "application/json"))?;
    parse_daily_response(&body)
}

// ============================================================================
// Period of record
// ============================================================================

/// Body of a continuous time-series metadata query for the given dbkeys.
pub fn build_timeseries_query(dbkeys: &[&str]) -> serde_json::Value {
    json!({
        "query": {
            "locations": [],
            "parameters": ["ALL"],
            "category": ["ALL"],
            "statistic": ["ALL"],
            "recorder": ["ALL"],
            "frequency": ["ALL"],
            "dbkeys": dbkeys,
        }
    })
}

/// Body of a catalogue query for the daily series of one parameter at the
/// given stations.
pub fn build_station_timeseries_query(stations: &[&str], parameter: &str) -> serde_json::Value {
    let locations: Vec<_> = stations
        .iter()
        .map(|s| json!({ "name": s, "type": "STATION" }))
        .collect();
    json!({
        "query": {
            "locations": locations,
            "parameters": [parameter],
            "category": ["WEATHER"],
            "statistic": ["ALL"],
            "recorder": ["ALL"],
            "frequency": ["DA"],
            "dbkeys": ["ALL"],
        }
    })
}

/// Body of a water-quality metadata query for stations and test numbers.
pub fn build_water_quality_query(stations: &[&str], test_numbers: &[u32]) -> serde_json::Value {
    let locations: Vec<_> = stations
        .iter()
        .map(|s| json!({ "name": s, "type": "SITE" }))
        .collect();
    let parameters: Vec<String> = test_numbers.iter().map(|n| n.to_string()).collect();
    json!({
        "query": {
            "locations": locations,
            "matrices": ["ALL"],
            "methods": ["ALL"],
            "paramGroups": ["ALL"],
            "parameters": parameters,
            "projects": ["ALL"],
            "sampleTypes": ["ALL"],
        }
    })
}

pub fn parse_period_of_record(body: &str) -> Result<Vec<PeriodOfRecord>, FetchError> {
    let response: PeriodResponse = serde_json::from_str(body)?;
    Ok(response
        .results
        .into_iter()
        .map(|e| PeriodOfRecord {
            dbkey: e.dbkey,
            station: e.station,
            start: e.start_date.as_deref().and_then(parse_dbhydro_date),
            end: e.end_date.as_deref().and_then(parse_dbhydro_date),
        })
        .collect())
}

/// True when every known period of record ends on or before `latest`,
/// i.e. the remote has nothing newer than what is on disk.
///
/// An empty metadata answer means the series is unknown to the service;
/// that is reported as not-latest so the caller attempts a fetch and
/// surfaces the real error.
pub fn is_latest(periods: &[PeriodOfRecord], latest: NaiveDate) -> bool {
    let ends: Vec<NaiveDate> = periods.iter().filter_map(|p| p.end).collect();
    !ends.is_empty() && ends.iter().all(|end| *end <= latest)
}

pub fn fetch_period_of_record(
    client: &reqwest::blocking::Client,
    base_url: &str,
    dbkeys: &[&str],
) -> Result<Vec<PeriodOfRecord>, FetchError> {
    let url = format!("{}/cont/ts", base_url);
    let body = send_text(client.post(&url).json(&build_timeseries_query(dbkeys)))?;
    parse_period_of_record(&body)
}

/// Daily series of `parameter` recorded at `stations`, one entry per dbkey.
pub fn fetch_station_series(
    client: &reqwest::blocking::Client,
    base_url: &str,
    stations: &[&str],
    parameter: &str,
) -> Result<Vec<PeriodOfRecord>, FetchError> {
    let url = format!("{}/cont/ts", base_url);
    let query = build_station_timeseries_query(stations, parameter);
    let body = send_text(client.post(&url).json(&query))?;
    parse_period_of_record(&body)
}

/// Freshness check for a daily series.
pub fn data_is_latest(
    client: &reqwest::blocking::Client,
    base_url: &str,
    dbkey: &str,
    latest: NaiveDate,
) -> Result<bool, FetchError> {
    let periods = fetch_period_of_record(client, base_url, &[dbkey])?;
    Ok(is_latest(&periods, latest))
}

// ============================================================================
// Water quality
// ============================================================================

/// Parses laboratory results. Non-numeric results (e.g. below detection
/// limit markers) become missing values.
pub fn parse_water_quality_response(body: &str) -> Result<Vec<WaterQualitySample>, FetchError> {
    let response: ChemResponse = serde_json::from_str(body)?;
    let mut samples = Vec::new();
    for result in response.results {
        let Some(collected) = parse_dbhydro_date(&result.date_collected) else {
            continue;
        };
        let value = match &result.sig_fig_value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        samples.push(WaterQualitySample {
            station: result.station.trim().to_string(),
            collected,
            value,
            units: result.units.unwrap_or_default(),
        });
    }
    Ok(samples)
}

fn chem_params(date_min: NaiveDate, date_max: NaiveDate) -> [(&'static str, String); 5] {
    [
        ("offset", "0".to_string()),
        ("limit", "100000".to_string()),
        ("sort", "project,location,parameterDesc,matrix,method".to_string()),
        ("startDate", compact(date_min)),
        ("endDate", compact(date_max)),
    ]
}

pub fn fetch_water_quality(
    client: &reqwest::blocking::Client,
    base_url: &str,
    station: &str,
    test_number: u32,
    date_min: NaiveDate,
    date_max: NaiveDate,
) -> Result<Vec<WaterQualitySample>, FetchError> {
    let url = format!("{}/chem/data", base_url);
    let request = client
        .post(&url)
        .query(&chem_params(date_min, date_max))
        .json(&build_water_quality_query(&[station], &[test_number]));
    parse_water_quality_response(&send_text(request)?)
}

/// Freshness check for one station's laboratory results.
pub fn water_quality_is_latest(
    client: &reqwest::blocking::Client,
    base_url: &str,
    station: &str,
    test_number: u32,
    latest: NaiveDate,
    today: NaiveDate,
) -> Result<bool, FetchError> {
    let url = format!("{}/chem/ts", base_url);
    let epoch = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default();
    let request = client
        .post(&url)
        .query(&chem_params(epoch, today))
        .json(&build_water_quality_query(&[station], &[test_number]));
    let periods = parse_period_of_record(&send_text(request)?)?;
    Ok(is_latest(&periods, latest))
}

// ============================================================================
// Station metadata
// ============================================================================

pub fn build_station_query(station: &str) -> [(&'static str, String); 6] {
    [
        ("f", "json".to_string()),
        ("outFields", "*".to_string()),
        ("spatialRel", "esriSpatialRelIntersects".to_string()),
        ("returnGeometry", "true".to_string()),
        ("outSR", "4326".to_string()),
        ("where", format!("(STATION = '{}')", station.replace('\'', "''"))),
    ]
}

fn attribute_f64(attributes: &serde_json::Map<String, serde_json::Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match attributes.get(*k)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Latitude/longitude of the first feature returned by the site-station
/// map service. Attribute coordinates win over the feature geometry.
pub fn parse_station_location(body: &str, station: &str) -> Result<Location, FetchError> {
    let response: SiteStationResponse = serde_json::from_str(body)?;
    let feature = response
        .features
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::NoData(format!("station {}", station)))?;

    let latitude = attribute_f64(&feature.attributes, &["LAT", "LATITUDE", "Latitude"])
        .or(feature.geometry.as_ref().map(|g| g.y));
    let longitude = attribute_f64(&feature.attributes, &["LONG", "LON", "LONGITUDE", "Longitude"])
        .or(feature.geometry.as_ref().map(|g| g.x));

    match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Ok(Location { latitude, longitude }),
        _ => Err(FetchError::Parse(format!("no coordinates for station {}", station))),
    }
}

pub fn fetch_station_location(
    client: &reqwest::blocking::Client,
    site_station_url: &str,
    station: &str,
) -> Result<Location, FetchError> {
    let body = send_text(client.get(site_station_url).query(&build_station_query(station)))?;
    parse_station_location(&body, station)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_build_daily_url() {
        let url = build_daily_url(
            "https://example.test/v1",
            &["16022", "12509"],
            d("2023-07-01"),
            d("2023-07-05"),
            Datum::Ngvd29,
        );
        assert_eq!(
            url,
            "https://example.test/v1/cont/data?dbkeys=16022,12509&startDate=20230701&endDate=20230705&vertDatum=NGVD29&frequency=DA"
        );
    }

    #[test]
    fn test_clean_value_drops_sentinels_and_flagged_zeros() {
        assert_eq!(clean_value(Some(-99999.0), ""), None);
        assert_eq!(clean_value(Some(0.0), "M"), None);
        assert_eq!(clean_value(Some(0.0), "N"), None);
        assert_eq!(clean_value(Some(0.0), ""), Some(0.0));
        assert_eq!(clean_value(Some(1.25), "M"), Some(1.25));
        assert_eq!(clean_value(None, ""), None);
    }

    #[test]
    fn test_parse_daily_response() {
        let body = r#"{
            "results": [
                {
                    "dbkey": "16022",
                    "siteCode": "L OKEE ",
                    "data": [
                        {"date": "2023-07-01", "value": 12.61, "qualifier": ""},
                        {"date": "02-JUL-2023", "value": -99999.0, "qualifier": ""},
                        {"date": "not a date", "value": 1.0}
                    ]
                }
            ]
        }"#;
        let values = parse_daily_response(body).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].site_code, "L OKEE");
        assert_eq!(values[0].value, Some(12.61));
        assert_eq!(values[1].date, d("2023-07-02"));
        assert_eq!(values[1].value, None);
    }

    #[test]
    fn test_parse_daily_response_rejects_garbage() {
        assert!(matches!(
            parse_daily_response("<html>maintenance</html>"),
            Err(FetchError::Parse(_))
        ));
    }

    #[test]
    fn test_period_of_record_latest_check() {
        let body = r#"{"results": [
            {"dbkey": "16022", "startDate": "1965-01-01", "endDate": "2023-07-05"},
            {"dbkey": "12509", "startDate": "1972-01-01", "endDate": "2023-07-04T00:00:00"}
        ]}"#;
        let periods = parse_period_of_record(body).unwrap();
        assert_eq!(periods[0].end, Some(d("2023-07-05")));
        assert!(is_latest(&periods, d("2023-07-05")));
        assert!(!is_latest(&periods, d("2023-07-04")));
        assert!(!is_latest(&[], d("2023-07-05")));
    }

    #[test]
    fn test_timeseries_query_names_dbkeys() {
        let query = build_timeseries_query(&["94832"]);
        assert_eq!(query["query"]["dbkeys"][0], "94832");
        assert_eq!(query["query"]["frequency"][0], "ALL");
    }

    #[test]
    fn test_water_quality_query_uses_site_locations() {
        let query = build_water_quality_query(&["L001"], &[25]);
        assert_eq!(query["query"]["locations"][0]["type"], "SITE");
        assert_eq!(query["query"]["parameters"][0], "25");
    }

    #[test]
    fn test_parse_water_quality_response() {
        let body = r#"{"results": [
            {"station": "L001", "dateCollected": "2023-07-01 10:15", "sigFigValue": "0.120", "units": "mg/L"},
            {"station": "L001", "dateCollected": "2023-07-01 14:40", "sigFigValue": 0.1, "units": "mg/L"},
            {"station": "L001", "dateCollected": "2023-07-02 09:00", "sigFigValue": "<0.004", "units": "mg/L"}
        ]}"#;
        let samples = parse_water_quality_response(body).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].collected, d("2023-07-01"));
        assert_eq!(samples[0].value, Some(0.12));
        assert_eq!(samples[1].value, Some(0.1));
        assert_eq!(samples[2].value, None);
        assert_eq!(samples[2].units, "mg/L");
    }

    #[test]
    fn test_parse_station_location_from_attributes() {
        let body = r#"{"features": [{"attributes": {"STATION": "L OKEE", "LAT": 26.9, "LONG": "-80.8"}}]}"#;
        let loc = parse_station_location(body, "L OKEE").unwrap();
        assert_eq!(loc, Location { latitude: 26.9, longitude: -80.8 });
    }

    #[test]
    fn test_parse_station_location_falls_back_to_geometry() {
        let body = r#"{"features": [{"attributes": {"STATION": "S65E"}, "geometry": {"x": -80.96, "y": 27.22}}]}"#;
        let loc = parse_station_location(body, "S65E").unwrap();
        assert_eq!(loc.latitude, 27.22);
        assert_eq!(loc.longitude, -80.96);
    }

    #[test]
    fn test_unknown_station_is_no_data() {
        let err = parse_station_location(r#"{"features": []}"#, "NOPE").unwrap_err();
        assert!(matches!(err, FetchError::NoData(_)));
    }

    #[test]
    #[ignore] // live API
    fn test_live_daily_fetch_for_lake_stage() {
        let client = crate::ingest::http_client(std::time::Duration::from_secs(30)).unwrap();
        let values = fetch_daily(
            &client,
            crate::config::DEFAULT_DBHYDRO_URL,
            &["16022"],
            d("2023-07-01"),
            d("2023-07-05"),
            Datum::Ngvd29,
        )
        .expect("DBHYDRO request failed - check network connectivity");
        assert!(!values.is_empty());
    }
}

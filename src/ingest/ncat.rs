/// NOAA NCAT vertical datum conversion
///
/// Converts lake stage from NAVD88 to NGVD29 through the National Geodetic
/// Survey's coordinate conversion and transformation tool. NCAT works in
/// meters; stage files are in feet.

use serde::Deserialize;

use super::{send_text, FetchError};
use crate::model::{feet_to_meters, meters_to_feet, Location};

#[derive(Debug, thiserror::Error)]
#[error("Error converting NAVD88 to NGVD29: {0}")]
pub struct ConversionError(#[from] pub FetchError);

#[derive(Debug, Deserialize)]
struct NcatResponse {
    #[serde(rename = "destOrthoht")]
    dest_orthoht: serde_json::Value,
}

/// Query parameters for one NAVD88 → NGVD29 conversion.
pub fn build_query(location: Location, stage_meters: f64, year: i32) -> Vec<(&'static str, String)> {
    vec![
        ("lat", location.latitude.to_string()),
        ("lon", location.longitude.to_string()),
        ("orthoHt", stage_meters.to_string()),
        ("year", year.to_string()),
        ("inDatum", "NAD83(1986)".to_string()),
        ("outDatum", "NAD83(1986)".to_string()),
        ("inVertDatum", "NAVD88".to_string()),
        ("outVertDatum", "NGVD29".to_string()),
    ]
}

/// Extracts the converted orthometric height, in meters.
pub fn parse_response(body: &str) -> Result<f64, FetchError> {
    let response: NcatResponse = serde_json::from_str(body)?;
    match response.dest_orthoht {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| FetchError::Parse("destOrthoht is not a number".to_string()))
}

/// Converts a NAVD88 stage in feet to NGVD29 feet. Missing stage stays
/// missing without a request.
pub fn navd88_to_ngvd29(
    client: &reqwest::blocking::Client,
    base_url: &str,
    location: Location,
    stage_feet: Option<f64>,
    year: i32,
) -> Result<Option<f64>, ConversionError> {
    let Some(stage_feet) = stage_feet else {
        return Ok(None);
    };
    let query = build_query(location, feet_to_meters(stage_feet), year);
    let body = send_text(client.get(base_url).query(&query))?;
    let meters = parse_response(&body)?;
    Ok(Some(meters_to_feet(meters)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_converts_between_vertical_datums() {
        let query = build_query(
            Location {
                latitude: 26.9,
                longitude: -80.8,
            },
            3.81,
            2024,
        );
        let get = |k: &str| query.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("inVertDatum"), Some("NAVD88"));
        assert_eq!(get("outVertDatum"), Some("NGVD29"));
        assert_eq!(get("orthoHt"), Some("3.81"));
        assert_eq!(get("year"), Some("2024"));
    }

    #[test]
    fn test_parse_response_accepts_string_or_number() {
        assert_eq!(parse_response(r#"{"destOrthoht": "4.2"}"#).unwrap(), 4.2);
        assert_eq!(parse_response(r#"{"destOrthoht": 4.5}"#).unwrap(), 4.5);
        assert!(parse_response(r#"{"destOrthoht": null}"#).is_err());
        assert!(parse_response(r#"{"error": "bad lat"}"#).is_err());
    }

    #[test]
    fn test_missing_stage_needs_no_request() {
        let client = reqwest::blocking::Client::new();
        let location = Location {
            latitude: 0.0,
            longitude: 0.0,
        };
        // Unroutable URL: the call would fail if a request were made.
        let converted = navd88_to_ngvd29(&client, "http://127.0.0.1:9/ncat", location, None, 2024).unwrap();
        assert_eq!(converted, None);
    }

    #[test]
    fn test_conversion_error_message() {
        let err = ConversionError(FetchError::Http(503));
        assert_eq!(err.to_string(), "Error converting NAVD88 to NGVD29: HTTP error: 503");
    }
}

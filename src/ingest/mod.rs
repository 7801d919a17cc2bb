//! Clients for the remote services the toolkit pulls from.
//!
//! Each submodule separates URL/query construction and response parsing
//! (pure, unit-tested against fixtures) from the blocking HTTP call itself.
//!
//! - `dbhydro`: SFWMD DBHYDRO Insights: daily series, water quality, metadata
//! - `ncat`: NOAA NCAT vertical datum conversion
//! - `ncei`: NOAA NCEI weekly Palmer drought index
//! - `geoglows`: GEOGLOWS streamflow forecast ensembles
//! - `open_meteo`: Open-Meteo hourly weather forecast

pub mod dbhydro;
pub mod geoglows;
pub mod ncat;
pub mod ncei;
pub mod open_meteo;

use std::time::Duration;

/// Errors that can arise when fetching from a remote time-series service.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Non-2xx HTTP response.
    #[error("HTTP error: {0}")]
    Http(u16),
    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The response body could not be interpreted.
    #[error("Parse error: {0}")]
    Parse(String),
    /// The service answered but had nothing for this query.
    #[error("No data available for {0}")]
    NoData(String),
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Parse(e.to_string())
    }
}

/// Blocking client shared by every ingest module.
pub fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, FetchError> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("loone_prep/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Sends a prepared request and returns the body, mapping non-2xx to `FetchError::Http`.
pub(crate) fn send_text(request: reqwest::blocking::RequestBuilder) -> Result<String, FetchError> {
    let response = request.send()?;
    if !response.status().is_success() {
        return Err(FetchError::Http(response.status().as_u16()));
    }
    Ok(response.text()?)
}

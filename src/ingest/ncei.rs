/// NOAA NCEI weekly Palmer drought index
///
/// NCEI publishes the weekly Palmer indices per climate division as a flat
/// CSV. The lake sits in Florida division 4 (South Central). The table is
/// kept as published; it is only checked for a header, a consistent column
/// count and at least one record.

use super::{send_text, FetchError};

/// Florida climate division 4, South Central.
pub const LAKE_DIVISION: &str = "0804";

/// A CSV table as downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

pub fn build_palmer_url(base_url: &str, division: &str) -> String {
    format!("{}/pdi-{}.csv", base_url, division)
}

pub fn parse_palmer_csv(body: &str) -> Result<CsvTable, FetchError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let parse = |e: csv::Error| FetchError::Parse(format!("Palmer index CSV: {}", e));

    let headers: Vec<String> = reader.headers().map_err(parse)?.iter().map(str::to_string).collect();
    if headers.len() < 2 {
        return Err(FetchError::Parse(format!(
            "Palmer index CSV has {} column(s), expected a date and at least one index",
            headers.len()
        )));
    }

    let records = reader
        .records()
        .map(|r| r.map(|record| record.iter().map(str::to_string).collect()))
        .collect::<Result<Vec<Vec<String>>, csv::Error>>()
        .map_err(parse)?;
    if records.is_empty() {
        return Err(FetchError::NoData("Palmer drought index".to_string()));
    }

    Ok(CsvTable { headers, records })
}

pub fn write_table<W: std::io::Write>(writer: W, table: &CsvTable) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&table.headers)?;
    for record in &table.records {
        wtr.write_record(record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn fetch_palmer_index(
    client: &reqwest::blocking::Client,
    base_url: &str,
    division: &str,
) -> Result<CsvTable, FetchError> {
    let body = send_text(client.get(build_palmer_url(base_url, division)))?;
    parse_palmer_csv(&body)
}

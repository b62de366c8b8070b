use crate::geo::{CountryCode, InvalidCountryCode};

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::net::Ipv4Addr;
use thiserror::Error;

/// All addresses from `start_ip` up to the next range's `start_ip` belong to `country_code`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IpRange {
    pub start_ip: u32,
    pub country_code: CountryCode,
}

/// Strict dotted-quad parser, anything else (IPv6 included) is `None`
pub fn parse_ipv4(s: &str) -> Option<Ipv4Addr> {
    s.trim().parse().ok()
}

/// Big-endian accumulation of the octets, the same for ingestion and lookup
pub fn ipv4_to_number(s: &str) -> Option<u32> {
    parse_ipv4(s).map(|ip| {
        ip.octets()
            .iter()
            .fold(0_u32, |acc, &octet| (acc << 8) + u32::from(octet))
    })
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum UnsortedStrategy {
    #[default]
    #[serde(alias = "sort")]
    Sort,
    #[serde(alias = "fail")]
    Fail,
}

#[derive(Error, Debug)]
pub enum RangeRowError {
    #[error("row {row}: expected at least 3 fields, got {fields}")]
    Fields { row: u64, fields: usize },
    #[error(r#"row {row}: "{value}" is not a valid IPv4 address"#)]
    InvalidIp { row: u64, value: String },
    #[error("row {row}: {error}")]
    InvalidCountryCode { row: u64, error: InvalidCountryCode },
    #[error("row {row}: {error}")]
    Record { row: u64, error: csv::Error },
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("range #{index} starts at {start_ip} which is below the previous start {previous_start_ip}")]
pub struct UnsortedRanges {
    pub index: usize,
    pub start_ip: u32,
    pub previous_start_ip: u32,
}

/// Outcome of parsing a range CSV stream, before the sortedness policy is applied
#[derive(Debug, Default)]
pub struct RangeIngest {
    pub ranges: Vec<IpRange>,
    pub warnings: Vec<RangeRowError>,
    pub skipped_ipv6: usize,
}

impl RangeIngest {
    /// Parse headerless `ip_start,ip_end,country_code` rows.
    ///
    /// Malformed rows become warnings, IPv6 rows are counted and skipped. Only I/O errors of the
    /// underlying reader (e.g. a broken gzip stream) are returned as `Err`.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);
        let mut ingest = Self::default();
        for (index, result) in csv_reader.records().enumerate() {
            let row = index as u64 + 1;
            let record = match result {
                Ok(record) => record,
                Err(error) if error.is_io_error() => return Err(error),
                Err(error) => {
                    ingest.warnings.push(RangeRowError::Record { row, error });
                    continue;
                }
            };
            match Self::parse_record(row, &record) {
                Ok(Some(range)) => ingest.ranges.push(range),
                Ok(None) => ingest.skipped_ipv6 += 1,
                Err(warning) => ingest.warnings.push(warning),
            }
        }
        Ok(ingest)
    }

    fn parse_record(row: u64, record: &csv::StringRecord) -> Result<Option<IpRange>, RangeRowError> {
        if record.len() < 3 {
            return Err(RangeRowError::Fields {
                row,
                fields: record.len(),
            });
        }
        let ip_start = record[0].trim();
        // ip_end is ignored
        let country_code = record[2].trim();
        if !ip_start.contains('.') {
            return Ok(None);
        }
        let start_ip = ipv4_to_number(ip_start).ok_or_else(|| RangeRowError::InvalidIp {
            row,
            value: ip_start.to_owned(),
        })?;
        let country_code = country_code
            .try_into()
            .map_err(|error| RangeRowError::InvalidCountryCode { row, error })?;
        Ok(Some(IpRange {
            start_ip,
            country_code,
        }))
    }

    /// Apply the sortedness policy, returning the final range table
    pub fn into_sorted(self, strategy: UnsortedStrategy) -> Result<Vec<IpRange>, UnsortedRanges> {
        let mut ranges = self.ranges;
        if let Some(error) = first_unsorted(&ranges) {
            match strategy {
                UnsortedStrategy::Fail => return Err(error),
                UnsortedStrategy::Sort => {
                    log::warn!("range table is not sorted ({error}), sorting it");
                    // Stable, so equal starts keep ingestion order and the later row still wins
                    ranges.sort_by_key(|range| range.start_ip);
                }
            }
        }
        Ok(ranges)
    }
}

pub fn first_unsorted(ranges: &[IpRange]) -> Option<UnsortedRanges> {
    ranges
        .windows(2)
        .position(|pair| pair[0].start_ip > pair[1].start_ip)
        .map(|position| UnsortedRanges {
            index: position + 1,
            start_ip: ranges[position + 1].start_ip,
            previous_start_ip: ranges[position].start_ip,
        })
}

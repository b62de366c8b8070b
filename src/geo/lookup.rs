use crate::geo::range::ipv4_to_number;
use crate::geo::{Country, GeolocationSnapshot, IpRange};

use thiserror::Error;

/// Lookup failures, `Display` strings are the exact user-facing messages
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    #[error("ip v4 required")]
    Ipv4Required,
    #[error("could not determine ip country")]
    CountryUnknown,
}

/// Index of the last range whose start is not greater than `ip_number`.
///
/// An address equal to a range start resolves to that range.
pub fn find_range_index(ranges: &[IpRange], ip_number: u32) -> Option<usize> {
    if ranges.is_empty() {
        return None;
    }
    let mut left: isize = 0;
    let mut right: isize = ranges.len() as isize - 1;
    while left <= right {
        let mid = (left + right) / 2;
        if ranges[mid as usize].start_ip <= ip_number {
            left = mid + 1;
        } else {
            right = mid - 1;
        }
    }
    usize::try_from(right).ok()
}

pub fn resolve_country(snapshot: &GeolocationSnapshot, ip: &str) -> Result<Country, LookupError> {
    let ip_number = ipv4_to_number(ip).ok_or(LookupError::Ipv4Required)?;
    resolve_number(snapshot, ip_number)
}

pub fn resolve_number(snapshot: &GeolocationSnapshot, ip_number: u32) -> Result<Country, LookupError> {
    let index =
        find_range_index(&snapshot.ranges, ip_number).ok_or(LookupError::CountryUnknown)?;
    snapshot
        .countries
        .get(&snapshot.ranges[index].country_code)
        .cloned()
        .ok_or(LookupError::CountryUnknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{CountryCode, Region};
    use std::collections::HashMap;

    fn range(start_ip: u32, code: &str) -> IpRange {
        IpRange {
            start_ip,
            country_code: code.try_into().unwrap(),
        }
    }

    fn country(code: &str, name: &str) -> (CountryCode, Country) {
        let code: CountryCode = code.try_into().unwrap();
        (
            code.clone(),
            Country {
                code,
                name: name.to_owned(),
                region: Region::Europe,
            },
        )
    }

    fn be_fr_snapshot() -> GeolocationSnapshot {
        GeolocationSnapshot {
            ranges: vec![range(0, "BE"), range(167772160, "FR")],
            countries: HashMap::from([country("BE", "Belgique"), country("FR", "France")]),
        }
    }

    fn linear_scan(ranges: &[IpRange], ip_number: u32) -> Option<usize> {
        ranges
            .iter()
            .enumerate()
            .filter(|(_, range)| range.start_ip <= ip_number)
            .map(|(index, _)| index)
            .last()
    }

    #[test]
    fn binary_search_matches_linear_scan() {
        let tables: Vec<Vec<IpRange>> = vec![
            vec![],
            vec![range(10, "BE")],
            vec![range(0, "BE"), range(10, "FR"), range(20, "DE")],
            vec![range(5, "BE"), range(5, "FR"), range(6, "DE"), range(6, "NL")],
            vec![
                range(3, "BE"),
                range(4, "FR"),
                range(4, "DE"),
                range(4, "NL"),
                range(100, "LU"),
                range(u32::MAX, "ZZ"),
            ],
            (0..50).map(|i| range(i * 7 + 1, "BE")).collect(),
        ];
        for ranges in &tables {
            for ip_number in (0..400).chain([u32::MAX - 1, u32::MAX]) {
                assert_eq!(
                    find_range_index(ranges, ip_number),
                    linear_scan(ranges, ip_number),
                    "ip_number {ip_number} in table of {} ranges",
                    ranges.len()
                );
            }
        }
    }

    #[test]
    fn duplicate_start_resolves_to_later_range() {
        let ranges = vec![range(0, "BE"), range(10, "FR"), range(10, "DE")];
        assert_eq!(find_range_index(&ranges, 10), Some(2));
        assert_eq!(find_range_index(&ranges, 11), Some(2));
        assert_eq!(find_range_index(&ranges, 9), Some(0));
    }

    #[test]
    fn inclusive_lower_bound() {
        let snapshot = be_fr_snapshot();
        assert_eq!(
            resolve_country(&snapshot, "10.0.0.0").unwrap().code.as_str(),
            "FR"
        );
        assert_eq!(
            resolve_country(&snapshot, "9.255.255.255")
                .unwrap()
                .code
                .as_str(),
            "BE"
        );
        assert_eq!(
            resolve_country(&snapshot, "10.5.5.5").unwrap().name,
            "France"
        );
    }

    #[test]
    fn below_first_range() {
        let snapshot = GeolocationSnapshot {
            ranges: vec![range(167772160, "FR")],
            ..be_fr_snapshot()
        };
        assert_eq!(
            resolve_country(&snapshot, "9.255.255.255"),
            Err(LookupError::CountryUnknown)
        );
    }

    #[test]
    fn empty_snapshot() {
        let snapshot = GeolocationSnapshot::default();
        for ip in ["0.0.0.0", "10.0.0.1", "255.255.255.255"] {
            assert_eq!(
                resolve_country(&snapshot, ip),
                Err(LookupError::CountryUnknown)
            );
        }
    }

    #[test]
    fn ranges_without_countries() {
        let snapshot = GeolocationSnapshot {
            countries: HashMap::new(),
            ..be_fr_snapshot()
        };
        assert_eq!(
            resolve_country(&snapshot, "10.0.0.1"),
            Err(LookupError::CountryUnknown)
        );
    }

    #[test]
    fn ipv6_is_rejected() {
        let snapshot = be_fr_snapshot();
        for ip in ["::1", "2001:db8::1", "::ffff:10.0.0.1", "localhost", ""] {
            assert_eq!(
                resolve_country(&snapshot, ip),
                Err(LookupError::Ipv4Required)
            );
        }
    }

    #[test]
    fn country_metadata_gap() {
        let snapshot = GeolocationSnapshot {
            ranges: vec![range(0, "BE"), range(167772160, "XX")],
            ..be_fr_snapshot()
        };
        assert_eq!(
            resolve_country(&snapshot, "10.0.0.1"),
            Err(LookupError::CountryUnknown)
        );
        assert_eq!(
            resolve_country(&snapshot, "1.0.0.1").unwrap().name,
            "Belgique"
        );
    }

    #[test]
    fn messages() {
        assert_eq!(LookupError::Ipv4Required.to_string(), "ip v4 required");
        assert_eq!(
            LookupError::CountryUnknown.to_string(),
            "could not determine ip country"
        );
    }
}

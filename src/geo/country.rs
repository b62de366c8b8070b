use crate::geo::Region;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error(r#"country code "{0}" must be exactly two uppercase letters"#)]
pub struct InvalidCountryCode(pub String);

/// ISO 3166-1 alpha-2 style code, two ASCII uppercase letters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode(String);

impl CountryCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(s: &str) -> bool {
        s.len() == 2 && s.bytes().all(|b| b.is_ascii_uppercase())
    }
}

impl<'a> TryFrom<&'a str> for CountryCode {
    type Error = InvalidCountryCode;

    fn try_from(s: &'a str) -> Result<Self, Self::Error> {
        if Self::is_valid(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidCountryCode(s.to_owned()))
        }
    }
}

impl TryFrom<String> for CountryCode {
    type Error = InvalidCountryCode;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&s) {
            Ok(Self(s))
        } else {
            Err(InvalidCountryCode(s))
        }
    }
}

impl From<CountryCode> for String {
    fn from(code: CountryCode) -> Self {
        code.0
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Country {
    pub code: CountryCode,
    pub name: String,
    pub region: Region,
}

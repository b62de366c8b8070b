use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error(r#"region "{0}" is not recognised"#)]
pub struct RegionUnknown(pub String);

/// World regions as used by the country metadata dataset
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Region {
    Africa,
    Americas,
    Antarctic,
    Asia,
    Europe,
    Oceania,
}

impl<'a> TryFrom<&'a str> for Region {
    type Error = RegionUnknown;

    fn try_from(s: &'a str) -> Result<Self, RegionUnknown> {
        match s.trim() {
            "Africa" => Ok(Self::Africa),
            "Americas" => Ok(Self::Americas),
            "Antarctic" => Ok(Self::Antarctic),
            "Asia" => Ok(Self::Asia),
            "Europe" => Ok(Self::Europe),
            "Oceania" => Ok(Self::Oceania),
            _ => Err(RegionUnknown(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Region {
    type Error = RegionUnknown;

    fn try_from(s: String) -> Result<Self, RegionUnknown> {
        s.as_str().try_into()
    }
}

impl From<Region> for &'static str {
    fn from(region: Region) -> Self {
        match region {
            Region::Africa => "Africa",
            Region::Americas => "Americas",
            Region::Antarctic => "Antarctic",
            Region::Asia => "Asia",
            Region::Europe => "Europe",
            Region::Oceania => "Oceania",
        }
    }
}

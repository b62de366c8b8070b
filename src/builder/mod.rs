//! Offline jobs filling the durable store from the upstream datasets

pub use countries::{CountryBuildError, CountryMetadataBuilder};
pub use download::{DownloadError, Downloader};
pub use ranges::{RangeBuildError, RangeTableBuilder};

mod countries;
mod download;
mod ranges;

use crate::geo::UnsortedStrategy;
use crate::kv::StoreConfig;

use hyper::header::HeaderMap;
use hyper::Uri;
use serde::Deserialize;
use std::net::SocketAddr;
use std::num::{NonZeroU64, NonZeroUsize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const RANGES_URL_ENV: &str = "IPGEO_RANGES_URL";
pub const COUNTRIES_URL_ENV: &str = "IPGEO_COUNTRIES_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(r#"no source URL for the {job} job, set "{section}.url" or the {variable} environment variable"#)]
    MissingUrl {
        job: &'static str,
        section: &'static str,
        variable: &'static str,
    },
    #[error(r#"URL "{url}" is invalid: {error}"#)]
    InvalidUrl {
        url: String,
        error: hyper::http::uri::InvalidUri,
    },
    #[error(r#"URL "{0}" must be http or https"#)]
    UnsupportedScheme(String),
}

/// Non-zero number of seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "NonZeroU64")]
pub struct Seconds(pub Duration);

impl From<NonZeroU64> for Seconds {
    fn from(value: NonZeroU64) -> Self {
        Self(Duration::from_secs(value.get()))
    }
}

impl From<Seconds> for Duration {
    fn from(value: Seconds) -> Self {
        value.0
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "Config::default_host")]
    pub host: SocketAddr,
    #[serde(default = "Config::default_log_level")]
    pub log_level: log::Level,
    /// Worker threads, one per core if not set
    #[serde(default)]
    pub threads: Option<NonZeroUsize>,
    #[serde(default = "Config::default_ip_headers")]
    pub ip_headers: Vec<String>,
    #[serde(default = "Config::default_ip_headers_recursive")]
    pub ip_headers_recursive: bool,
    #[serde(default, with = "http_serde::header_map")]
    pub response_headers: HeaderMap,
    /// Period of snapshot reloads from the store, never reloaded if not set
    #[serde(default)]
    pub reload_interval: Option<Seconds>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ranges: RangesConfig,
    #[serde(default)]
    pub countries: CountriesConfig,
}

impl Config {
    fn default_host() -> SocketAddr {
        ([127, 0, 0, 1], 8080).into()
    }

    fn default_log_level() -> log::Level {
        log::Level::Info
    }

    fn default_ip_headers() -> Vec<String> {
        vec!["X-FORWARDED-FOR".into()]
    }

    fn default_ip_headers_recursive() -> bool {
        true
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Source URLs from `env` replace the ones from the file
    pub fn with_env_overrides<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = env(RANGES_URL_ENV) {
            self.ranges.url = Some(url);
        }
        if let Some(url) = env(COUNTRIES_URL_ENV) {
            self.countries.url = Some(url);
        }
        self
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangesConfig {
    /// May contain [RangesConfig::YEAR_MONTH] which is replaced with the current UTC month
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "RangesConfig::default_timeout")]
    pub timeout: Seconds,
    #[serde(default)]
    pub unsorted: UnsortedStrategy,
}

impl RangesConfig {
    pub const YEAR_MONTH: &'static str = "{year-month}";

    fn default_timeout() -> Seconds {
        Seconds(Duration::from_secs(600))
    }

    pub fn url_template(&self) -> Result<&str, ConfigError> {
        self.url.as_deref().ok_or(ConfigError::MissingUrl {
            job: "range table",
            section: "ranges",
            variable: RANGES_URL_ENV,
        })
    }
}

impl Default for RangesConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Self::default_timeout(),
            unsorted: UnsortedStrategy::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountriesConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "CountriesConfig::default_timeout")]
    pub timeout: Seconds,
}

impl CountriesConfig {
    fn default_timeout() -> Seconds {
        Seconds(Duration::from_secs(60))
    }

    pub fn uri(&self) -> Result<Uri, ConfigError> {
        let url = self.url.as_deref().ok_or(ConfigError::MissingUrl {
            job: "country metadata",
            section: "countries",
            variable: COUNTRIES_URL_ENV,
        })?;
        parse_http_uri(url)
    }
}

impl Default for CountriesConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Self::default_timeout(),
        }
    }
}

pub fn parse_http_uri(url: &str) -> Result<Uri, ConfigError> {
    let uri: Uri = url.parse().map_err(|error| ConfigError::InvalidUrl {
        url: url.to_owned(),
        error,
    })?;
    match uri.scheme_str() {
        Some("http") | Some("https") if uri.authority().is_some() => Ok(uri),
        _ => Err(ConfigError::UnsupportedScheme(url.to_owned())),
    }
}

pub fn parse_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let toml_string = std::fs::read_to_string(path)?;
    let config = Config::from_toml_str(&toml_string)?;
    Ok(config.with_env_overrides(|name| std::env::var(name).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.host, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.ip_headers, vec!["X-FORWARDED-FOR".to_owned()]);
        assert!(config.ip_headers_recursive);
        assert!(config.response_headers.is_empty());
        assert!(config.reload_interval.is_none());
        assert!(config.threads.is_none());
        assert_eq!(config.ranges.timeout, Seconds(Duration::from_secs(600)));
        assert_eq!(config.ranges.unsorted, UnsortedStrategy::Sort);
        assert_eq!(config.countries.timeout, Seconds(Duration::from_secs(60)));
        assert!(matches!(
            config.ranges.url_template(),
            Err(ConfigError::MissingUrl { section: "ranges", .. })
        ));
        assert!(matches!(
            config.countries.uri(),
            Err(ConfigError::MissingUrl {
                section: "countries",
                ..
            })
        ));
    }

    #[test]
    fn full_config() {
        let config = Config::from_toml_str(
            r#"
            host = "0.0.0.0:3000"
            threads = 2
            ip_headers = ["X-REAL-IP", "X-FORWARDED-FOR"]
            ip_headers_recursive = false
            reload_interval = 3600

            [response_headers]
            Cache-Control = "no-store"

            [store]
            type = "memory"

            [ranges]
            url = "https://download.db-ip.com/free/dbip-country-lite-{year-month}.csv.gz"
            timeout = 120
            unsorted = "fail"

            [countries]
            url = "https://restcountries.com/v3.1/all?fields=name,cca2,region"
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.threads, NonZeroUsize::new(2));
        assert!(!config.ip_headers_recursive);
        assert_eq!(
            config.reload_interval,
            Some(Seconds(Duration::from_secs(3600)))
        );
        assert_eq!(config.response_headers["cache-control"], "no-store");
        assert!(matches!(config.store, StoreConfig::Memory));
        assert_eq!(config.ranges.unsorted, UnsortedStrategy::Fail);
        assert_eq!(config.ranges.timeout, Seconds(Duration::from_secs(120)));
        assert!(config
            .ranges
            .url_template()
            .unwrap()
            .contains(RangesConfig::YEAR_MONTH));
        assert_eq!(
            config.countries.uri().unwrap().host(),
            Some("restcountries.com")
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(Config::from_toml_str("[ranges]\ntimeout = 0").is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(Config::from_toml_str("geolite2 = \"path\"").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let config = Config::from_toml_str(
            r#"
            [ranges]
            url = "https://file.example/ranges.csv.gz"
            "#,
        )
        .unwrap()
        .with_env_overrides(|name| match name {
            COUNTRIES_URL_ENV => Some("https://env.example/countries.json".to_owned()),
            _ => None,
        });
        assert_eq!(
            config.ranges.url_template().unwrap(),
            "https://file.example/ranges.csv.gz"
        );
        assert_eq!(
            config.countries.uri().unwrap().host(),
            Some("env.example")
        );
    }

    #[test]
    fn http_uri_validation() {
        assert!(parse_http_uri("http://localhost:8000/a.json").is_ok());
        assert!(matches!(
            parse_http_uri("ftp://example.com/a.json"),
            Err(ConfigError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            parse_http_uri("/a.json"),
            Err(ConfigError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            parse_http_uri("http://exa mple.com"),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }
}

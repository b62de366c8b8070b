pub use country::{Country, CountryCode, InvalidCountryCode};
pub use lookup::{find_range_index, resolve_country, LookupError};
pub use range::{ipv4_to_number, parse_ipv4, IpRange, RangeIngest, RangeRowError, UnsortedStrategy};
pub use region::{Region, RegionUnknown};
pub use snapshot::{GeolocationSnapshot, GeolocationStore};

mod country;
pub mod lookup;
pub mod range;
mod region;
mod snapshot;

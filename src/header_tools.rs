use hyper::HeaderMap;
use std::net::IpAddr;

/// Raw client address from the first present header of `header_names`.
///
/// The value is returned unparsed, so the lookup can tell IPv6 from garbage.
pub fn client_ip(headers: &HeaderMap, header_names: &[String], recursive: bool) -> Option<String> {
    header_names
        .iter()
        .filter_map(|name| {
            let values = headers.get_all(name);
            let mut it_values = values.iter();
            if recursive {
                it_values.next()
            } else {
                it_values.next_back()
            }
        })
        .next()
        .and_then(|value| {
            let value = value.to_str().ok()?;
            let mut split = value.split(',');
            if recursive {
                split.next()
            } else {
                split.next_back()
            }
        })
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

/// Socket peers of a dual-stack listener show up as `::ffff:a.b.c.d`
pub fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

pub fn remote_ip(
    headers: &HeaderMap,
    header_names: &[String],
    recursive: bool,
    socket_ip: IpAddr,
) -> String {
    client_ip(headers, header_names, recursive)
        .unwrap_or_else(|| canonical_ip(socket_ip).to_string())
}

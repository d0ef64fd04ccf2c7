//! Peer address allocation inside an interface subnet

use crate::{Error, Result};
use ipnetwork::{IpNetwork, Ipv4Network};
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Parse an interface address such as `10.0.0.1/24` into its prefix and host address.
pub fn parse_interface_address(address: &str) -> Result<(Ipv4Network, Ipv4Addr)> {
    let network: IpNetwork = address
        .trim()
        .parse()
        .map_err(|e| Error::validation(format!("parse interface address {}: {}", address, e)))?;
    match network {
        IpNetwork::V4(v4) => Ok((v4, v4.ip())),
        IpNetwork::V6(_) => Err(Error::validation("interface address is not IPv4")),
    }
}

/// Next free address in `prefix`, scanning upward from the address after the network address.
///
/// The interface address and everything in `used` are skipped. The result depends only on the
/// inputs, so a released address is handed out again before any higher one.
pub fn next_available_ipv4(
    prefix: Ipv4Network,
    interface_addr: Ipv4Addr,
    used: &HashSet<Ipv4Addr>,
) -> Result<Ipv4Addr> {
    if prefix.prefix() >= 31 {
        return Err(Error::validation("prefix too small to allocate address"));
    }

    let network = u32::from(prefix.network());
    let last = u32::from(prefix.broadcast());
    for candidate in (network + 1)..=last {
        let candidate = Ipv4Addr::from(candidate);
        if candidate == interface_addr || used.contains(&candidate) {
            continue;
        }
        return Ok(candidate);
    }

    Err(Error::validation("no available address in prefix"))
}

/// Collect IPv4 host addresses from CIDR strings, ignoring anything unparsable.
pub fn used_addresses<'a>(cidrs: impl IntoIterator<Item = &'a str>) -> HashSet<Ipv4Addr> {
    cidrs
        .into_iter()
        .filter_map(|cidr| cidr.trim().parse::<IpNetwork>().ok())
        .filter_map(|net| match net {
            IpNetwork::V4(v4) => Some(v4.ip()),
            IpNetwork::V6(_) => None,
        })
        .collect()
}

/// Allocate the next `/32` for a peer on an interface with the given address.
pub fn allocate_peer_address(interface_address: &str, used: &HashSet<Ipv4Addr>) -> Result<String> {
    let (prefix, interface_addr) = parse_interface_address(interface_address)?;
    let mut used = used.clone();
    used.insert(prefix.network());
    let addr = next_available_ipv4(prefix, interface_addr, &used)?;
    Ok(format!("{}/32", addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn test_skips_network_and_interface() {
        let used = HashSet::new();
        let addr = next_available_ipv4(net("10.0.0.1/24"), "10.0.0.1".parse().unwrap(), &used).unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 2));

        // Interface sitting on a higher address leaves .1 free
        let addr = next_available_ipv4(net("10.0.0.5/24"), "10.0.0.5".parse().unwrap(), &used).unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn test_reuses_lowest_released_address() {
        let mut used = HashSet::new();
        let first = allocate_peer_address("10.0.0.1/24", &used).unwrap();
        used.extend(used_addresses([first.as_str()]));
        let second = allocate_peer_address("10.0.0.1/24", &used).unwrap();
        used.extend(used_addresses([second.as_str()]));
        assert_eq!(first, "10.0.0.2/32");
        assert_eq!(second, "10.0.0.3/32");

        used.remove(&Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(allocate_peer_address("10.0.0.1/24", &used).unwrap(), "10.0.0.2/32");
    }

    #[test]
    fn test_small_prefixes_rejected() {
        let used = HashSet::new();
        for prefix in ["10.0.0.1/31", "10.0.0.1/32"] {
            let err = allocate_peer_address(prefix, &used).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{prefix}: {err}");
        }
    }

    #[test]
    fn test_exhaustion() {
        // /30: .1 is the interface, .2 and .3 are the only candidates
        let used = used_addresses(["10.0.0.2/32", "10.0.0.3/32"]);
        let err = allocate_peer_address("10.0.0.1/30", &used).unwrap_err();
        assert!(err.to_string().contains("no available address"));
    }

    #[test]
    fn test_rejects_ipv6_interface() {
        assert!(parse_interface_address("fd00::1/64").is_err());
        assert!(parse_interface_address("not-an-address").is_err());
    }

    #[test]
    fn test_used_addresses_ignores_ipv6_and_garbage() {
        let used = used_addresses(["10.0.0.2/32", "fd00::2/128", "bogus", " 10.0.0.9/32 "]);
        assert_eq!(used.len(), 2);
        assert!(used.contains(&Ipv4Addr::new(10, 0, 0, 9)));
    }
}

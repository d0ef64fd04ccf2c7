//! Allowed-destination projection
//!
//! A peer's effective destination set is its own `/32` followed by the
//! interface routes and then its peer routes, each group sorted, duplicates removed.

use crate::types::{InterfaceRoute, PeerRoute};
use crate::{Error, Result};
use ipnetwork::IpNetwork;
use std::collections::HashSet;

/// Reject anything that is not an IPv4 CIDR in `address/prefix` form.
pub fn validate_ipv4_cidr(cidr: &str) -> Result<()> {
    if !cidr.contains('/') {
        return Err(Error::validation(format!("invalid CIDR {:?}: missing prefix length", cidr)));
    }
    match cidr.parse::<IpNetwork>() {
        Ok(IpNetwork::V4(_)) => Ok(()),
        Ok(IpNetwork::V6(_)) => Err(Error::validation("only IPv4 CIDR is supported")),
        Err(e) => Err(Error::validation(format!("invalid CIDR {:?}: {}", cidr, e))),
    }
}

/// Drop empty entries and repeats, keeping first occurrences in order.
pub fn dedupe(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

/// Effective destinations of a stored peer.
pub fn effective_destinations(
    peer_allowed_ip: &str,
    interface_routes: &[InterfaceRoute],
    peer_routes: &[PeerRoute],
) -> Vec<String> {
    let mut interface_cidrs: Vec<String> = interface_routes.iter().map(|r| r.cidr.clone()).collect();
    let mut peer_cidrs: Vec<String> = peer_routes.iter().map(|r| r.cidr.clone()).collect();
    interface_cidrs.sort();
    peer_cidrs.sort();

    dedupe(
        std::iter::once(peer_allowed_ip.to_string())
            .chain(interface_cidrs)
            .chain(peer_cidrs),
    )
}

/// Destinations requested at peer creation: validated explicit entries plus the
/// interface routes, sorted. The peer's own address is prepended by the repository.
pub fn creation_destinations(
    explicit: &[String],
    interface_routes: &[InterfaceRoute],
) -> Result<Vec<String>> {
    let mut items = Vec::with_capacity(explicit.len() + interface_routes.len());
    for cidr in explicit {
        let cidr = cidr.trim();
        if cidr.is_empty() {
            continue;
        }
        validate_ipv4_cidr(cidr)?;
        items.push(cidr.to_string());
    }
    items.extend(interface_routes.iter().map(|r| r.cidr.clone()));
    items.sort();
    Ok(dedupe(items))
}

/// Prefix `items` with the peer's own address, trimmed and deduplicated.
pub fn with_own_address(peer_allowed_ip: &str, items: &[String]) -> Vec<String> {
    dedupe(
        std::iter::once(peer_allowed_ip.trim().to_string())
            .chain(items.iter().map(|item| item.trim().to_string())),
    )
}

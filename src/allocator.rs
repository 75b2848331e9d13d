use std::{collections::HashSet, net::IpAddr};

use ipnet::IpNet;

/// Find the first free host address in a network given the addresses already
/// in use.
///
/// Hosts are tried in ascending order, so identical inputs always yield the
/// identical address. Returns `None` if every host address is taken.
#[tracing::instrument]
pub fn next_free_address(network: &IpNet, used: &HashSet<IpAddr>) -> Option<IpAddr> {
    for host in network.hosts() {
        // ipnet's IPv6 host iterator starts at the subnet-router anycast
        // address, which must never be handed to a peer.
        if host == network.network() {
            continue;
        }
        if !used.contains(&host) {
            return Some(host);
        }
    }
    None
}

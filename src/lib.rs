pub mod allocator;
pub mod wireguard;

use std::time::Duration;

use anyhow::{Context, Result};
use ipnet::{Ipv4Net, Ipv6Net};
use tracing::{debug, info};
use wireguard_keys::{Privkey, Secret};

use crate::wireguard::{PeerCredentials, WgPeer};

/// Allocate addresses for a new peer, generate its keys and register it on
/// the interface.
///
/// The interface is snapshotted once at the start. A concurrent allocation
/// against the same interface can race for the same address; the last
/// `wg set` wins.
#[tracing::instrument]
pub async fn add_peer(
    interface: &str,
    ipv4_subnet: Ipv4Net,
    ipv6_subnet: Ipv6Net,
    endpoint: Option<&str>,
    keepalive: Duration,
) -> Result<PeerCredentials> {
    let used = wireguard::used_addresses(interface).await?;
    debug!(
        "Found {} IPv4 and {} IPv6 addresses in use",
        used.v4.len(),
        used.v6.len()
    );

    // Both families must have room before we touch the interface.
    let ipv4 = allocator::next_free_address(&ipv4_subnet.into(), &used.v4)
        .with_context(|| format!("No free IPv4 address left in {ipv4_subnet}"))?;
    let ipv6 = allocator::next_free_address(&ipv6_subnet.into(), &used.v6)
        .with_context(|| format!("No free IPv6 address left in {ipv6_subnet}"))?;
    info!("Allocated addresses {ipv4} and {ipv6}");

    let private_key = Privkey::generate();
    let preshared_key = Secret::generate();

    let peer = WgPeer::new(private_key.pubkey(), preshared_key, endpoint, ipv4, ipv6);
    wireguard::register_peer(interface, &peer, keepalive).await?;

    Ok(PeerCredentials::new(
        private_key,
        preshared_key,
        peer.ipv4,
        peer.ipv6,
    ))
}

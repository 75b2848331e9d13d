use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    net::IpAddr,
    process::Stdio,
    time::Duration,
};

use anyhow::{ensure, Context, Result};
use ipnet::IpNet;
use serde::Serialize;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{info, trace};
use wireguard_keys::{Privkey, Pubkey, Secret};

/// Addresses already assigned to peers, partitioned by address family.
///
/// This is a point-in-time snapshot of the live interface state, rebuilt on
/// every allocation. It is never persisted or updated incrementally.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct UsedAddresses {
    pub v4: HashSet<IpAddr>,
    pub v6: HashSet<IpAddr>,
}

impl UsedAddresses {
    /// Collect every IP literal from a peer listing of whitespace-separated
    /// lines of the form `<peer-id> <allowed-ip>[,<allowed-ip>...]`.
    ///
    /// CIDR suffixes are stripped. Literals that don't parse as an address,
    /// such as wg's `(none)` marker, are skipped without aborting the scan.
    pub fn from_allowed_ips(listing: &str) -> Self {
        let mut used = Self::default();
        for line in listing.lines() {
            // The first field is the peer's public key.
            for field in line.split_ascii_whitespace().skip(1) {
                for entry in field.split(',') {
                    let literal = entry.split_once('/').map_or(entry, |(address, _)| address);
                    match literal.parse() {
                        Ok(address @ IpAddr::V4(_)) => {
                            used.v4.insert(address);
                        }
                        Ok(address @ IpAddr::V6(_)) => {
                            used.v6.insert(address);
                        }
                        Err(_) => trace!("Ignoring allowed IP entry {entry:?}"),
                    }
                }
            }
        }
        used
    }
}

/// Get the addresses currently assigned to peers by running
/// 'wg show <interface> allowed-ips'
#[tracing::instrument]
pub async fn used_addresses(interface: &str) -> Result<UsedAddresses> {
    let output = Command::new("wg")
        .arg("show")
        .arg(interface)
        .arg("allowed-ips")
        .output()
        .await
        .context("Couldn't run wg show")?;
    ensure!(
        output.status.success(),
        "Couldn't get output of wg show: {:?}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = std::str::from_utf8(&output.stdout)?;

    Ok(UsedAddresses::from_allowed_ips(stdout))
}

#[derive(Clone)]
pub struct WgPeer {
    pub public_key: Pubkey,
    pub preshared_key: Secret,

    /// Public endpoint of the peer, if known ahead of the first handshake.
    pub endpoint: Option<String>,

    /// The WireGuard internal addresses of the peer, one per family.
    ///
    /// They carry the most specific netmask as they're meant for only that
    /// peer. So for IPv4, /32 and for IPv6, /128.
    pub ipv4: IpNet,
    pub ipv6: IpNet,
}

impl WgPeer {
    pub fn new(
        public_key: Pubkey,
        preshared_key: Secret,
        endpoint: Option<&str>,
        ipv4: IpAddr,
        ipv6: IpAddr,
    ) -> Self {
        Self {
            public_key,
            preshared_key,
            endpoint: endpoint.map(str::to_string),
            ipv4: ipv4.into(),
            ipv6: ipv6.into(),
        }
    }

    /// The allowed-IPs list as `wg set` expects it: comma-separated, no spaces.
    pub fn allowed_ips(&self) -> String {
        format!("{},{}", self.ipv4, self.ipv6)
    }
}

impl fmt::Debug for WgPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgPeer")
            .field("public_key", &self.public_key.to_base64_urlsafe())
            .field("preshared_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("ipv4", &self.ipv4)
            .field("ipv6", &self.ipv6)
            .finish()
    }
}

/// Register a peer on the interface by running 'wg set'.
///
/// The preshared key never appears on the command line; it is written to the
/// child's stdin and read back through `preshared-key /dev/stdin`.
#[tracing::instrument(skip(peer))]
pub async fn register_peer(interface: &str, peer: &WgPeer, keepalive: Duration) -> Result<()> {
    let mut command = Command::new("wg");
    command
        .arg("set")
        .arg(interface)
        .arg("peer")
        .arg(peer.public_key.to_base64())
        .arg("preshared-key")
        .arg("/dev/stdin");
    if let Some(endpoint) = &peer.endpoint {
        command.arg("endpoint").arg(endpoint);
    }
    command
        .arg("allowed-ips")
        .arg(peer.allowed_ips())
        .arg("persistent-keepalive")
        .arg(keepalive.as_secs().to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().context("Couldn't run wg set")?;
    let mut stdin = child
        .stdin
        .take()
        .context("Couldn't open stdin of wg set")?;
    stdin
        .write_all(format!("{}\n", peer.preshared_key.to_base64()).as_bytes())
        .await?;
    drop(stdin);

    let output = child.wait_with_output().await?;
    ensure!(
        output.status.success(),
        "Couldn't register peer with wg set: {:?}",
        String::from_utf8_lossy(&output.stderr)
    );
    info!(
        "Registered peer {} on {interface} with allowed IPs {}",
        peer.public_key.to_base64(),
        peer.allowed_ips()
    );
    Ok(())
}

/// Remove a peer from the interface by running 'wg set <interface> peer <key> remove'
#[tracing::instrument]
pub async fn remove_peer(interface: &str, public_key: Pubkey) -> Result<()> {
    let output = Command::new("wg")
        .arg("set")
        .arg(interface)
        .arg("peer")
        .arg(public_key.to_base64())
        .arg("remove")
        .output()
        .await
        .context("Couldn't run wg set")?;
    ensure!(
        output.status.success(),
        "Couldn't remove peer with wg set: {:?}",
        String::from_utf8_lossy(&output.stderr)
    );
    info!("Removed peer {} from {interface}", public_key.to_base64());
    Ok(())
}

/// Per-peer traffic totals in bytes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PeerTransfer {
    pub upload: u64,
    pub download: u64,
}

fn parse_transfer_stats(s: &str) -> Result<BTreeMap<String, PeerTransfer>> {
    let mut stats = BTreeMap::new();
    for line in s.lines() {
        let split_line = line.split_ascii_whitespace().collect::<Vec<_>>();
        if split_line.len() != 3 {
            continue;
        }
        let public_key: Pubkey = split_line[0].parse()?;
        // wg prints received before sent; bytes the interface received are
        // the peer's upload.
        stats.insert(
            public_key.to_base64(),
            PeerTransfer {
                upload: split_line[1].parse()?,
                download: split_line[2].parse()?,
            },
        );
    }
    Ok(stats)
}

/// Get per-peer transfer totals by running 'wg show <interface> transfer'
#[tracing::instrument]
pub async fn transfer_stats(interface: &str) -> Result<BTreeMap<String, PeerTransfer>> {
    let output = Command::new("wg")
        .arg("show")
        .arg(interface)
        .arg("transfer")
        .output()
        .await
        .context("Couldn't run wg show")?;
    ensure!(
        output.status.success(),
        "Couldn't get output of wg show: {:?}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = std::str::from_utf8(&output.stdout)?;

    parse_transfer_stats(stdout)
}

/// Everything the caller needs to finish configuring the new peer's end of
/// the tunnel, in the shape the `add` command prints.
#[derive(Serialize)]
pub struct PeerCredentials {
    #[serde(rename = "privatekey")]
    pub private_key: Privkey,

    /// Both tunnel addresses with their most specific prefixes,
    /// e.g. `10.25.0.2/32, fd42:42:42::2/128`.
    pub address: String,

    #[serde(rename = "presharedkey")]
    pub preshared_key: Secret,

    #[serde(rename = "publickey")]
    pub public_key: Pubkey,
}

impl PeerCredentials {
    pub fn new(private_key: Privkey, preshared_key: Secret, ipv4: IpNet, ipv6: IpNet) -> Self {
        Self {
            private_key,
            address: format!("{ipv4}, {ipv6}"),
            preshared_key,
            public_key: private_key.pubkey(),
        }
    }
}

impl fmt::Debug for PeerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerCredentials")
            .field("private_key", &"[REDACTED]")
            .field("address", &self.address)
            .field("preshared_key", &"[REDACTED]")
            .field("public_key", &self.public_key.to_base64_urlsafe())
            .finish()
    }
}

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use ipnet::{Ipv4Net, Ipv6Net};
use wireguard_keys::Pubkey;

#[derive(Parser)]
#[command(name = "wgraven", author, about, version)]
pub struct CliArgs {
    /// WireGuard interface name
    #[arg(short = 'i', long, default_value = "wg0", global = true)]
    pub interface: String,

    /// Be verbose
    ///
    /// Provide twice for very verbose.
    #[arg(short, long, action = clap::ArgAction::Count, value_parser = clap::value_parser!(u8).range(0..=2), global = true)]
    pub verbose: u8,

    /// Generate completion file for a shell
    #[arg(long = "print-completions", value_name = "shell")]
    pub print_completions: Option<Shell>,

    /// Generate man page
    #[arg(long = "print-manpage")]
    pub print_manpage: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Allocate addresses for a new peer, register it and print its credentials
    Add(AddArgs),

    /// Remove a peer from the interface
    Delete(DeleteArgs),

    /// Print per-peer transfer totals
    Transfer,
}

#[derive(Args)]
pub struct AddArgs {
    /// IPv4 subnet to allocate the peer's IPv4 address from
    #[arg(long, default_value = "10.25.0.0/16")]
    pub ipv4_subnet: Ipv4Net,

    /// IPv6 subnet to allocate the peer's IPv6 address from
    #[arg(long, default_value = "fd42:42:42::/112")]
    pub ipv6_subnet: Ipv6Net,

    /// Public endpoint of the peer
    ///
    /// Can be a hostname or IP address, with port.
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Persistent keepalive interval
    #[arg(long, default_value = "25s", value_parser = humantime::parse_duration)]
    pub keepalive: Duration,
}

#[derive(Args)]
pub struct DeleteArgs {
    /// Base64-encoded public key of the peer to remove
    #[arg(value_parser = public_key)]
    pub public_key: Pubkey,
}

fn public_key(s: &str) -> Result<Pubkey, String> {
    Pubkey::from_base64(s).map_err(|e| format!("Invalid public key: {e}"))
}

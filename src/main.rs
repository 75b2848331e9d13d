mod args;

use std::{io, process::ExitCode};

use anyhow::{bail, Context, Result};
use clap::{error::ErrorKind, CommandFactory, Parser};
use serde_json::json;

use crate::args::{CliArgs, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{e}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            println!("{:#}", json!({ "error": e.to_string() }));
            return ExitCode::FAILURE;
        }
    };

    let filter = match args.verbose {
        0 => "wgraven=info",
        1 => "wgraven=debug",
        _ => "wgraven=trace",
    };
    // Logs go to stderr as stdout carries the JSON output.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{:#}", json!({ "error": format!("{e:#}") }));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs) -> Result<()> {
    if let Some(shell) = args.print_completions {
        let mut command = CliArgs::command();
        let name = command.get_name().to_string();
        clap_complete::generate(shell, &mut command, name, &mut io::stdout());
        return Ok(());
    }

    if args.print_manpage {
        let man = clap_mangen::Man::new(CliArgs::command());
        man.render(&mut io::stdout())
            .context("Couldn't render manpage")?;
        return Ok(());
    }

    let Some(command) = args.command else {
        bail!("No command given, expected 'add', 'delete' or 'transfer'");
    };

    match command {
        Commands::Add(add) => {
            let credentials = wgraven::add_peer(
                &args.interface,
                add.ipv4_subnet,
                add.ipv6_subnet,
                add.endpoint.as_deref(),
                add.keepalive,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&credentials)?);
        }
        Commands::Delete(delete) => {
            wgraven::wireguard::remove_peer(&args.interface, delete.public_key).await?;
            println!(
                "{:#}",
                json!({
                    "success": format!(
                        "Peer with public key {} removed.",
                        delete.public_key.to_base64()
                    )
                })
            );
        }
        Commands::Transfer => {
            let stats = wgraven::wireguard::transfer_stats(&args.interface).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

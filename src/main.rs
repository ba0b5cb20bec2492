use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use rdpcarve::config::{Config, OutputFormat};
use rdpcarve::convert;

#[derive(Parser)]
#[command(
    name = "rdpcarve",
    version,
    about = "Rebuild RDP session recordings from packet captures and TLS key logs"
)]
struct Cli {
    /// Path to a .pcap, .pcapng, .cap or .rdpreplay file
    input: PathBuf,

    /// Print the sessions found in the capture without converting anything
    #[arg(short, long)]
    list: bool,

    /// SSLKEYLOGFILE holding the CLIENT_RANDOM master secrets
    #[arg(short, long, env = "SSLKEYLOGFILE")]
    secrets: Option<PathBuf>,

    /// Format of the recordings
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Replay)]
    format: OutputFormat,

    /// Only convert connections initiated from this address (repeatable)
    #[arg(long)]
    src: Vec<IpAddr>,

    /// Only convert connections destined to this address (repeatable)
    #[arg(long)]
    dst: Vec<IpAddr>,

    /// Output directory, or a file name used as prefix for every recording
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::new(cli.input, cli.output.as_deref())?
        .list(cli.list)
        .secrets(cli.secrets)
        .format(cli.format)
        .filters(cli.src, cli.dst);

    let summary = convert::run(&config)?;
    if !config.list && summary.flows > 0 {
        eprintln!(
            "{} {} written, {} failed",
            "Done:".bold(),
            summary.written.len(),
            summary.failed
        );
    }
    Ok(())
}

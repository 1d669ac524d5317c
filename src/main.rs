use anyhow::{bail, Context, Result};
use clap::Parser;
use hue_discovery::{
    BridgeDiscovery, BridgeDiscoveryResult, DiscoveryConfig, DiscoveryOptions, ReturnCode,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Grace period for the stopped search to report back
const STOP_GRACE: Duration = Duration::from_secs(5);

/// hue-discover - Find Philips Hue bridges on the local network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Discovery methods, comma separated (upnp, nupnp, mdns, ipscan)
    #[arg(short, long, default_value = "mdns,nupnp")]
    methods: DiscoveryOptions,

    /// Stop the search after this many seconds
    #[arg(short, long, default_value_t = 30)]
    timeout_secs: u64,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

fn print_bridges(bridges: &[BridgeDiscoveryResult], code: ReturnCode, json: bool) -> Result<()> {
    if json {
        let report = serde_json::json!({
            "code": code.to_string(),
            "bridges": bridges,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if bridges.is_empty() {
        println!("No bridges found ({})", code);
        return Ok(());
    }

    println!("{:<18} {:<16} {:<8} {:<10} NAME", "ID", "IP", "MODEL", "API");
    for bridge in bridges {
        println!(
            "{:<18} {:<16} {:<8} {:<10} {}",
            bridge.unique_id(),
            bridge.ip(),
            bridge.model_id(),
            bridge.api_version(),
            bridge.name()
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DiscoveryConfig::from_config_builder(args.config.as_deref())
        .context("Failed to load configuration")?;
    let discovery = BridgeDiscovery::new(config).context("Failed to start discovery")?;

    info!(methods = ?args.methods, timeout_secs = args.timeout_secs, "Searching for bridges");

    let (tx, rx) = flume::bounded(1);
    discovery.search_with(
        args.methods,
        Some(Box::new(move |bridges: Vec<BridgeDiscoveryResult>, code: ReturnCode| {
            let _ = tx.send((bridges, code));
        })),
    );

    let (bridges, code) = match rx.recv_timeout(Duration::from_secs(args.timeout_secs)) {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(timeout_secs = args.timeout_secs, "Search timed out, stopping");
            discovery.stop();
            rx.recv_timeout(STOP_GRACE)
                .context("Search did not report after being stopped")?
        }
    };

    match code {
        ReturnCode::Success | ReturnCode::Stopped => print_bridges(&bridges, code, args.json),
        other => bail!("Discovery failed: {}", other),
    }
}

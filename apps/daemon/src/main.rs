use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ds4_core::config::DaemonConfig;
use ds4_core::driver::HidrawDriver;
use ds4_core::session::Orchestrator;
use ds4_core::shutdown::{ShutdownToken, install_signal_handlers};
use ds4_core::usb::provision;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "DualShock 4 connection daemon", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the IPC socket path
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Pair a USB-attached controller before starting
    #[arg(long)]
    pair: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => DaemonConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DaemonConfig::default(),
    };
    if let Some(socket) = args.socket {
        config.ipc.socket_path = socket;
    }

    info!("Starting ds4d...");

    let shutdown = ShutdownToken::new();
    install_signal_handlers(&shutdown).context("installing signal handlers")?;

    if args.pair || config.pairing.auto_pair {
        provision_at_startup(&config);
    }

    let driver = HidrawDriver::new(config.device.vendor_id, &config.device.product_ids);
    let mut orchestrator = Orchestrator::new(driver, config.ipc, config.session, shutdown);
    orchestrator.run()?;

    info!("ds4d exiting");
    Ok(())
}

/// Pairing problems never stop the daemon; a controller that is already
/// paired can still connect.
fn provision_at_startup(config: &DaemonConfig) {
    let Some(identity) = config.pairing.host.as_ref() else {
        warn!("Pairing requested but no [pairing.host] configured");
        return;
    };
    if let Err(e) = provision(
        config.device.vendor_id,
        &config.device.product_ids,
        identity,
    ) {
        warn!(error = %e, "USB pairing skipped");
    }
}

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ds4_core::config::DaemonConfig;
use ds4_core::protocol::{BdAddr, HostIdentity, LinkKey};
use ds4_core::usb::{ProvisionOutcome, provision, read_pairing};
use ds4_core::{IpcClient, OutputCommand};
use tracing::error;

#[derive(Parser, Debug)]
#[command(author, version, about = "DualShock 4 pairing and status tool", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect or change the pairing of a USB-attached controller
    Pair {
        #[command(subcommand)]
        action: PairAction,
    },
    /// Query the running daemon for the current controller snapshot
    Status {
        /// Override the IPC socket path
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Send an LED colour with the request, as `r,g,b`
        #[arg(long)]
        led: Option<String>,

        /// How long to wait for the daemon's reply
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
    /// Write a default configuration file
    InitConfig {
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum PairAction {
    /// Show the controller address and the host it is paired to
    Show,
    /// Pair the controller with a host address and link key
    Set {
        /// Host Bluetooth address (aa:bb:cc:dd:ee:ff); defaults to the config
        #[arg(long)]
        host: Option<BdAddr>,

        /// Link key as 32 hex characters; defaults to the config
        #[arg(long)]
        key: Option<LinkKey>,
    },
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
    let config = match &args.config {
        Some(path) => DaemonConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DaemonConfig::default(),
    };
    let vid = config.device.vendor_id;
    let pids = &config.device.product_ids;

    match args.command {
        Commands::Pair {
            action: PairAction::Show,
        } => {
            let info = read_pairing(vid, pids)?;
            println!("Controller: {}", info.device_addr);
            println!("Paired to:  {}", info.stored_host_addr);
        }
        Commands::Pair {
            action: PairAction::Set { host, key },
        } => {
            let configured = config.pairing.host;
            let identity = HostIdentity {
                address: match host.or(configured.map(|h| h.address)) {
                    Some(addr) => addr,
                    None => bail!("no host address given (--host or [pairing.host])"),
                },
                link_key: match key.or(configured.map(|h| h.link_key)) {
                    Some(key) => key,
                    None => bail!("no link key given (--key or [pairing.host])"),
                },
            };
            match provision(vid, pids, &identity)? {
                ProvisionOutcome::AlreadyPaired(info) => {
                    println!("{} already paired to {}", info.device_addr, info.stored_host_addr);
                }
                ProvisionOutcome::Paired { previous, current } => {
                    println!(
                        "{} paired to {} (was {})",
                        current.device_addr, current.stored_host_addr, previous.stored_host_addr
                    );
                }
            }
        }
        Commands::Status {
            socket,
            led,
            timeout_ms,
        } => {
            let socket = socket.unwrap_or(config.ipc.socket_path);
            let command = led.as_deref().map(parse_led).transpose()?;
            let reply = IpcClient::new(&socket)
                .with_timeout(Duration::from_millis(timeout_ms))
                .query(command)
                .with_context(|| format!("querying {}", socket.display()))?;
            println!("Sequence: {}", reply.controls.sequence);
            let hex: Vec<String> = reply
                .controls
                .report
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect();
            println!("Report:   {}", hex.join(" "));
        }
        Commands::InitConfig { path } => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            DaemonConfig::default().save_to_file(&path)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn parse_led(s: &str) -> Result<OutputCommand> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [r, g, b] = parts.as_slice() else {
        bail!("LED colour must be r,g,b");
    };
    Ok(OutputCommand {
        red: r.parse().context("red")?,
        green: g.parse().context("green")?,
        blue: b.parse().context("blue")?,
        ..Default::default()
    })
}

//! sbx Control - installs Caddy and sing-box from upstream releases
//!
//! Downloads the newest release for this host, places the binaries under the
//! work directory and manages their systemd units.

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sbx_common::{SbxConfig, CADDY, SING_BOX};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "sbxctl")]
#[command(about = "Install and supervise Caddy and sing-box from upstream releases", long_about = None)]
#[command(version = VERSION)]
struct Cli {
    /// Use the newest pre-release instead of the newest stable release
    #[arg(short, long, global = true)]
    latest: bool,

    /// Configuration file (default: /etc/sbx/config.toml if present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download the latest release of Caddy
    #[command(alias = "c")]
    Caddy,

    /// Download the latest release of sing-box
    #[command(alias = "s")]
    Sing,

    /// Install Caddy and sing-box and generate their services
    Install {
        /// Enable and start both services afterwards
        #[arg(long)]
        start: bool,
    },

    /// Generate systemd services for Caddy and sing-box
    Service,

    /// Generate a Caddyfile for the given domain
    Caddyfile {
        /// Domain served by Caddy
        domain: String,
    },

    /// Stop and remove both services and their binaries
    Uninstall,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Check if running as root
fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let config = SbxConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    debug!(?config, "Configuration loaded");

    if !is_root() {
        output::display_warning("not running as root; writes under system directories will likely fail");
    }

    match cli.command {
        Commands::Caddy => commands::fetch(&config, &cancel, &CADDY, cli.latest).await,
        Commands::Sing => commands::fetch(&config, &cancel, &SING_BOX, cli.latest).await,
        Commands::Install { start } => commands::install(&config, &cancel, cli.latest, start).await,
        Commands::Service => commands::service(&config, &cancel).await,
        Commands::Caddyfile { domain } => commands::caddyfile(&config, &domain),
        Commands::Uninstall => commands::uninstall(&config, &cancel).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, canceling");
            on_interrupt.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::display_error(&format!("{:#}", e));
            ExitCode::from(1)
        }
    }
}

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fitsync_session::{extract_fit_filenames, SyncError, SyncReport};
#[cfg(feature = "ble-btleplug")]
use fitsync_session::{sync_device, DirSink};
#[cfg(feature = "ble-btleplug")]
use fitsync_transport_ble::btleplug_backend::{BtleplugLink, BtleplugLinkConfig};
use tracing::{error, info};

mod config;

use crate::config::CliConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (.toml, .yaml, .json or .env)
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every new activity file from the device (default)
    Sync,
    /// Print the activity files named in a saved listing
    Files {
        /// Listing file previously stored by a sync
        listing: PathBuf,
    },
}

#[cfg(feature = "ble-btleplug")]
fn link_config(config: &CliConfig) -> BtleplugLinkConfig {
    BtleplugLinkConfig {
        scan_timeout: config.scan_timeout,
        connect_timeout: config.connect_timeout,
        connect_attempts: config.connect_attempts,
        write_settle: config.write_settle,
        ..BtleplugLinkConfig::default()
    }
}

#[cfg(feature = "ble-btleplug")]
fn run_sync(config: &CliConfig) -> SyncReport {
    let link = match BtleplugLink::spawn(link_config(config)) {
        Ok(link) => link,
        Err(err) => {
            error!("bluetooth unavailable: {err}");
            std::process::exit(1);
        }
    };
    sync_device(
        link,
        DirSink::new(config.output_dir.clone()),
        config.session(),
        &config.target_name,
    )
}

#[cfg(not(feature = "ble-btleplug"))]
fn run_sync(_config: &CliConfig) -> SyncReport {
    error!("built without bluetooth support; rebuild with --features ble-btleplug");
    std::process::exit(2);
}

fn main() {
    let filter = std::env::var("FITSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    if let Some(Commands::Files { listing }) = &cli.command {
        let raw = match fs::read(listing) {
            Ok(raw) => raw,
            Err(err) => {
                error!("failed to read {}: {err}", listing.display());
                std::process::exit(1);
            }
        };
        for name in extract_fit_filenames(&raw) {
            println!("{name}");
        }
        return;
    }

    let config = match CliConfig::new(cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err}");
            std::process::exit(1);
        }
    };
    info!(
        "syncing {} into {}",
        config.target_name,
        config.output_dir.display()
    );

    let report = run_sync(&config);
    println!("{report}");
    for result in &report.results {
        println!("  {result}");
    }

    let code = exit_code(&report);
    if code != 0 {
        std::process::exit(code);
    }
}

/// 0 when nothing went wrong, including a device with nothing to sync; 1 for a
/// session failure; 3 when only some files failed.
fn exit_code(report: &SyncReport) -> i32 {
    match &report.session_error {
        Some(SyncError::IncompleteListing) => {
            info!("no activity files on the device, nothing to sync");
            0
        }
        Some(err) => {
            error!("session failed: {err}");
            1
        }
        None if report.failed() > 0 => 3,
        None => 0,
    }
}

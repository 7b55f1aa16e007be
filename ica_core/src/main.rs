//! # ICA Core Binary
//!
//! Runs the master loop with the device and data-logging workers.
//!
//! # Usage
//!
//! ```bash
//! ica_core --config config/ica.toml
//!
//! # Verbose, JSON logs
//! ica_core --config config/ica.toml -v --json
//! ```

use clap::Parser;
use ica_common::config::{ConfigLoader, LogLevel};
use ica_common::event::TracingEventSink;
use ica_core::app::System;
use ica_core::config::SystemConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// ICA Core - command dispatch and state-gated execution
#[derive(Parser, Debug)]
#[command(name = "ica_core")]
#[command(version)]
#[command(about = "Command dispatch, correlation and state-gated execution engine")]
#[command(long_about = None)]
struct Args {
    /// Path to the system configuration file.
    #[arg(short, long, default_value = "config/ica.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(e) = run() {
        error!("ica_core failed: {}", e);
        eprintln!("ica_core failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = SystemConfig::load_validated(&args.config)?;

    setup_tracing(&args, config.shared.log_level);
    info!(
        "ICA Core v{} starting ({})",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name
    );

    let mut system = System::build(&config, Arc::new(TracingEventSink))?;

    let handle = system.master.handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        handle.stop();
    })?;

    system.startup()?;
    system.master.run();

    info!(
        day_log_records = system.day_log.len(),
        "ICA Core shutdown complete"
    );
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        level.as_directive()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

//! CLI entry point for picoscpi
//!
//! Serves the control protocol and the sample stream for one oscilloscope.
//!
//! # Usage
//!
//! Start the server on the default ports (5025 control, 50101 data):
//! ```bash
//! picoscpi serve
//! ```
//!
//! Override ports and print the effective configuration:
//! ```bash
//! picoscpi --config picoscpi.toml check-config
//! picoscpi serve --port 5555 --data-port 50200 --log-level debug
//! ```
//!
//! The binary drives the simulated device; a vendor-SDK driver plugs in
//! through the same `ScopeDriver` trait.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use picoscpi::config::ServerConfig;
use picoscpi::hardware::MockScope;
use picoscpi::network::serve;
use picoscpi::tracing_setup;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "picoscpi")]
#[command(about = "Oscilloscope command server with raw sample streaming", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring up the device and serve clients until Ctrl+C
    Serve {
        /// Control protocol port
        #[arg(long)]
        port: Option<u16>,

        /// Sample stream port
        #[arg(long)]
        data_port: Option<u16>,

        /// Address to bind both listeners to
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Log level (trace, debug, info, warn, error)
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Validate the configuration and print it
    CheckConfig,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.command {
        Commands::CheckConfig => {
            config.validate()?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Serve {
            port,
            data_port,
            bind,
            log_level,
        } => {
            if let Some(port) = port {
                config.server.control_port = port;
            }
            if let Some(port) = data_port {
                config.server.data_port = port;
            }
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if let Some(level) = log_level {
                config.logging.level = level;
            }
            config.validate()?;
            run(config).await
        }
    }
}

async fn run(config: ServerConfig) -> Result<()> {
    tracing_setup::init_from_config(&config)?;
    info!(
        control_port = config.server.control_port,
        data_port = config.server.data_port,
        "Starting picoscpi"
    );

    let driver = Arc::new(
        MockScope::automatic(Duration::from_millis(config.simulation.capture_delay_ms))
            .with_identity(config.simulation.identity.clone()),
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    serve(&config, driver, shutdown).await?;
    info!("Server shut down");
    Ok(())
}

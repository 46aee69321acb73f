// CLI module - User-facing command-line interface

mod output;

use crate::api;
use crate::config::SupervisorConfig;
use crate::error::{Result, VigilError};
use crate::logging;
use crate::process::{DetailedReport, ProcessStatus, Supervisor};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How often the interactive mode prints the status table
const STATUS_PRINT_INTERVAL: Duration = Duration::from_secs(30);

/// Vigil - keeps a declared set of processes alive and healthy
#[derive(Parser)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor with a configuration file
    Run {
        /// Path to the configuration file (.json or .toml)
        #[arg(short, long)]
        config: PathBuf,

        /// Port of the HTTP status API
        #[arg(short, long, default_value_t = api::DEFAULT_PORT)]
        port: u16,

        /// Run without printing periodic status tables
        #[arg(short, long)]
        daemon: bool,

        /// Enable debug logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Write a sample configuration
    SampleConfig {
        /// Destination file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Query a running supervisor
    Status {
        /// Base URL of the HTTP status API
        #[arg(short, long, default_value = "http://127.0.0.1:8090")]
        url: String,

        /// Show per-process details
        #[arg(short, long)]
        detailed: bool,
    },
}

impl Cli {
    /// Execute the parsed command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                config,
                port,
                daemon,
                verbose,
            } => run(&config, port, daemon, verbose).await,
            Commands::SampleConfig { output } => write_sample_config(output.as_deref()),
            Commands::Status { url, detailed } => query_status(&url, detailed).await,
        }
    }
}

async fn run(config_path: &Path, port: u16, daemon: bool, verbose: bool) -> Result<()> {
    let config = SupervisorConfig::from_file(config_path)?;
    logging::init(config.log_file.as_deref(), verbose);

    let supervisor = Arc::new(Supervisor::new(config)?);
    let listener = api::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;

    supervisor.start().await;
    info!(config = %config_path.display(), port, "Vigil started");
    output::print_success_msg(&format!(
        "Supervising {} process(es), API on port {}",
        supervisor.get_status().await.len(),
        port
    ));

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(api::serve(
        Arc::clone(&supervisor),
        listener,
        shutdown.clone(),
    ));

    if !daemon {
        tokio::spawn(print_status_periodically(
            Arc::clone(&supervisor),
            shutdown.clone(),
        ));
    }

    wait_for_signal().await;
    output::print_info("Shutting down...");

    shutdown.cancel();
    supervisor.stop().await;

    match server.await {
        Ok(result) => result?,
        Err(e) => error!(error = %e, "HTTP API task failed"),
    }

    output::print_success_msg("Vigil stopped");
    Ok(())
}

async fn print_status_periodically(supervisor: Arc<Supervisor>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(STATUS_PRINT_INTERVAL);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                output::print_detailed_table(&supervisor.get_detailed_status().await);
            }
        }
    }
}

/// Resolve on SIGINT or SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }
}

fn write_sample_config(output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(&SupervisorConfig::sample())
        .map_err(|e| VigilError::ConfigError(format!("Failed to serialize sample config: {}", e)))?;

    match output {
        Some(path) => {
            std::fs::write(path, json + "\n")?;
            output::print_success_msg(&format!(
                "Sample configuration written to {}",
                path.display()
            ));
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn query_status(url: &str, detailed: bool) -> Result<()> {
    let base = url.trim_end_matches('/');

    if detailed {
        let report: DetailedReport = fetch_json(&format!("{}/status/detailed", base)).await?;
        output::print_detailed_table(&report);
    } else {
        let status: BTreeMap<String, ProcessStatus> =
            fetch_json(&format!("{}/status", base)).await?;
        output::print_status_table(&status);
    }
    Ok(())
}

async fn fetch_json<T: serde::de::DeserializeOwned>(url: &str) -> Result<T> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| VigilError::ApiRequest(format!("GET {}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(VigilError::ApiRequest(format!(
            "GET {} returned {}",
            url,
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| VigilError::ApiRequest(format!("GET {}: invalid body: {}", url, e)))
}

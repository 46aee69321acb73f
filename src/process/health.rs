use crate::config::{HealthCheckConfig, ProbeKind};
use crate::error::{Result, VigilError};
use crate::process::lifecycle;
use crate::process::restart::RestartPolicy;
use crate::process::types::{ProcessRecord, ProcessStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A liveness probe selected once, when the configuration is loaded
#[async_trait]
pub trait HealthProbe: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ProbeKind;

    /// Run the probe once; `Ok(())` means healthy
    async fn check(&self, timeout: Duration) -> Result<()>;
}

/// Build the probe described by a health check block
pub fn build_probe(config: &HealthCheckConfig) -> Result<Box<dyn HealthProbe>> {
    let probe: Box<dyn HealthProbe> = match config.kind {
        ProbeKind::Http => Box::new(HttpProbe::new(&config.target)?),
        ProbeKind::Tcp => Box::new(TcpProbe::new(&config.target)),
        ProbeKind::Command => Box::new(CommandProbe::new(&config.target)),
    };
    Ok(probe)
}

/// GET against a URL; healthy on 2xx and 3xx.
///
/// Redirects are followed (up to ten hops), so the final response decides.
#[derive(Debug)]
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| VigilError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Http
    }

    async fn check(&self, timeout: Duration) -> Result<()> {
        let response = self
            .client
            .get(&self.url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| VigilError::HealthCheckError(format!("GET {}: {}", self.url, e)))?;

        let status = response.status();
        if (200..400).contains(&status.as_u16()) {
            Ok(())
        } else {
            Err(VigilError::HealthCheckError(format!(
                "GET {} returned {}",
                self.url, status
            )))
        }
    }
}

/// TCP connect to `host:port`
#[derive(Debug)]
pub struct TcpProbe {
    address: String,
}

impl TcpProbe {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
        }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Tcp
    }

    async fn check(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(VigilError::HealthCheckError(format!(
                "connect {}: {}",
                self.address, e
            ))),
            Err(_) => Err(VigilError::HealthCheckError(format!(
                "connect {}: timed out after {:?}",
                self.address, timeout
            ))),
        }
    }
}

/// Shell command; healthy iff it exits with code 0
#[derive(Debug)]
pub struct CommandProbe {
    command: String,
}

impl CommandProbe {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

#[async_trait]
impl HealthProbe for CommandProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Command
    }

    async fn check(&self, timeout: Duration) -> Result<()> {
        // kill_on_drop reaps the command when the timeout drops the future
        let run = Command::new("/bin/sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(VigilError::HealthCheckError(format!(
                "`{}` exited with {}",
                self.command, status
            ))),
            Ok(Err(e)) => Err(VigilError::HealthCheckError(format!(
                "`{}` could not run: {}",
                self.command, e
            ))),
            Err(_) => Err(VigilError::HealthCheckError(format!(
                "`{}` timed out after {:?}",
                self.command, timeout
            ))),
        }
    }
}

/// Run the configured probe of one record and apply the result.
///
/// Only `Running` and `Unhealthy` records are probed. No lock is held while
/// the probe runs; the result is discarded if the record launched a new
/// instance in the meantime.
pub async fn check_record(record: &ProcessRecord, policy: &RestartPolicy) {
    let (Some(probe), Some(hc)) = (record.probe(), record.config().health_check.as_ref()) else {
        return;
    };

    let generation = {
        let state = record.state.read().await;
        if !matches!(state.status, ProcessStatus::Running | ProcessStatus::Unhealthy) {
            debug!(process = %record.name(), status = %state.status, "Skipping health check");
            return;
        }
        state.generation
    };

    let outcome = probe.check(hc.timeout).await;

    let stop_requested = {
        let mut state = record.state.write().await;
        if state.generation != generation
            || !matches!(state.status, ProcessStatus::Running | ProcessStatus::Unhealthy)
        {
            debug!(process = %record.name(), "Discarding stale health check result");
            return;
        }

        state.last_health_check = Some(Utc::now());

        match outcome {
            Ok(()) => {
                if state.status == ProcessStatus::Unhealthy {
                    info!(process = %record.name(), "Process is healthy again");
                    state.transition(ProcessStatus::Running);
                    state.last_error = None;
                }
                false
            }
            Err(e) => {
                warn!(process = %record.name(), probe = %probe.kind(), error = %e, "Health check failed");
                state.transition(ProcessStatus::Unhealthy);
                state.last_error = Some(e.to_string());

                let decision =
                    policy.evaluate(record.config().restart_on_exit, &state.restart_history);
                if decision.is_allowed() {
                    true
                } else {
                    debug!(process = %record.name(), ?decision, "Unhealthy process left running");
                    false
                }
            }
        }
    };

    if stop_requested {
        info!(process = %record.name(), "Restarting unhealthy process");
        lifecycle::request_stop_of(record, generation, "health check failure").await;
    }
}

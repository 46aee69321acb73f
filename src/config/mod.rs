pub mod duration;

use crate::error::{Result, VigilError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use duration::{format_duration, parse_duration};

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RESTARTS: usize = 5;
const DEFAULT_RESTART_WINDOW: Duration = Duration::from_secs(3600);
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Top-level supervisor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Processes to supervise
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,

    /// How often health checks and resource sampling run
    #[serde(default = "default_check_interval", with = "duration::serde_str")]
    pub check_interval: Duration,

    /// Optional log file; logs go to stdout when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Maximum restarts allowed inside `restart_window`
    #[serde(default = "default_max_restarts")]
    pub max_restarts: usize,

    /// Trailing window used to rate-limit restarts
    #[serde(default = "default_restart_window", with = "duration::serde_str")]
    pub restart_window: Duration,
}

/// Configuration of a single supervised process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Process name (unique identifier)
    pub name: String,

    /// Program followed by its arguments
    pub command: Vec<String>,

    /// Working directory for the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Environment variables added on top of the inherited environment
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// CPU ceiling in percent (0 disables the check)
    #[serde(default)]
    pub max_cpu: f64,

    /// Resident memory ceiling in MB (0 disables the check)
    #[serde(default)]
    pub max_memory: u64,

    /// Whether the process is relaunched after it exits
    #[serde(default)]
    pub restart_on_exit: bool,

    /// Optional liveness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckConfig>,

    /// Disabled processes are not supervised
    #[serde(default)]
    pub enabled: bool,
}

/// Probe kind of a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Http,
    Tcp,
    Command,
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeKind::Http => write!(f, "http"),
            ProbeKind::Tcp => write!(f, "tcp"),
            ProbeKind::Command => write!(f, "command"),
        }
    }
}

/// Health check definition attached to a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(rename = "type")]
    pub kind: ProbeKind,

    /// URL, `host:port` address or shell command depending on `kind`
    pub target: String,

    /// Informational only: probes run on the global `check_interval`
    #[serde(default = "default_probe_interval", with = "duration::serde_str")]
    pub interval: Duration,

    #[serde(default = "default_probe_timeout", with = "duration::serde_str")]
    pub timeout: Duration,
}

// Default value functions for serde
fn default_check_interval() -> Duration {
    DEFAULT_CHECK_INTERVAL
}

fn default_max_restarts() -> usize {
    DEFAULT_MAX_RESTARTS
}

fn default_restart_window() -> Duration {
    DEFAULT_RESTART_WINDOW
}

fn default_probe_interval() -> Duration {
    DEFAULT_PROBE_INTERVAL
}

fn default_probe_timeout() -> Duration {
    DEFAULT_PROBE_TIMEOUT
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            processes: Vec::new(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            log_file: None,
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_window: DEFAULT_RESTART_WINDOW,
        }
    }
}

impl SupervisorConfig {
    /// Load the configuration from a file (supports JSON and TOML)
    pub fn from_file(path: &Path) -> Result<SupervisorConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VigilError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let config = match extension {
            "json" => Self::parse_json(&contents)?,
            "toml" => Self::parse_toml(&contents)?,
            _ => {
                return Err(VigilError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .json or .toml",
                    extension
                )))
            }
        };

        config.prepare()
    }

    /// Parse JSON configuration
    pub fn parse_json(contents: &str) -> Result<SupervisorConfig> {
        serde_json::from_str(contents)
            .map_err(|e| VigilError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Parse TOML configuration
    pub fn parse_toml(contents: &str) -> Result<SupervisorConfig> {
        toml::from_str(contents)
            .map_err(|e| VigilError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    /// Apply defaults, expand environment variables and validate
    pub fn prepare(mut self) -> Result<SupervisorConfig> {
        self.apply_defaults();
        for process in &mut self.processes {
            process.expand_env_vars();
        }
        self.validate()?;
        Ok(self)
    }

    /// Replace unset (zero) values with their defaults
    pub fn apply_defaults(&mut self) {
        if self.check_interval.is_zero() {
            self.check_interval = DEFAULT_CHECK_INTERVAL;
        }
        if self.max_restarts == 0 {
            self.max_restarts = DEFAULT_MAX_RESTARTS;
        }
        if self.restart_window.is_zero() {
            self.restart_window = DEFAULT_RESTART_WINDOW;
        }

        for process in &mut self.processes {
            if process
                .working_dir
                .as_ref()
                .is_some_and(|dir| dir.as_os_str().is_empty())
            {
                process.working_dir = None;
            }
            if let Some(ref mut hc) = process.health_check {
                if hc.timeout.is_zero() {
                    hc.timeout = DEFAULT_PROBE_TIMEOUT;
                }
                if hc.interval.is_zero() {
                    hc.interval = DEFAULT_PROBE_INTERVAL;
                }
            }
        }
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(VigilError::ConfigValidationError(
                "check_interval must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for process in &self.processes {
            process.validate()?;
            if !seen.insert(process.name.as_str()) {
                return Err(VigilError::ConfigValidationError(format!(
                    "Duplicate process name: {}",
                    process.name
                )));
            }
        }

        Ok(())
    }

    /// Processes that should get a supervision record
    pub fn enabled_processes(&self) -> impl Iterator<Item = &ProcessConfig> {
        self.processes.iter().filter(|p| p.enabled)
    }

    /// Sample configuration written by `vigil sample-config`
    pub fn sample() -> SupervisorConfig {
        SupervisorConfig {
            processes: vec![ProcessConfig {
                name: "test-server".to_string(),
                command: vec![
                    "python3".to_string(),
                    "-m".to_string(),
                    "http.server".to_string(),
                    "8000".to_string(),
                ],
                working_dir: Some(PathBuf::from("/tmp")),
                environment: HashMap::new(),
                max_cpu: 50.0,
                max_memory: 100,
                restart_on_exit: true,
                health_check: Some(HealthCheckConfig {
                    kind: ProbeKind::Http,
                    target: "http://localhost:8000".to_string(),
                    interval: Duration::from_secs(30),
                    timeout: Duration::from_secs(5),
                }),
                enabled: true,
            }],
            check_interval: Duration::from_secs(30),
            log_file: Some(PathBuf::from("/tmp/vigil.log")),
            max_restarts: 3,
            restart_window: Duration::from_secs(600),
        }
    }
}

impl ProcessConfig {
    /// Validate a single process entry
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(VigilError::ConfigValidationError(
                "process name must not be empty".to_string(),
            ));
        }

        if self.command.first().map_or(true, |c| c.trim().is_empty()) {
            return Err(VigilError::ConfigValidationError(format!(
                "process {}: command must not be empty",
                self.name
            )));
        }

        if !self.max_cpu.is_finite() || self.max_cpu < 0.0 {
            return Err(VigilError::ConfigValidationError(format!(
                "process {}: max_cpu must be a non-negative number",
                self.name
            )));
        }

        if let Some(ref hc) = self.health_check {
            if hc.target.trim().is_empty() {
                return Err(VigilError::ConfigValidationError(format!(
                    "process {}: health check target must not be empty",
                    self.name
                )));
            }
        }

        Ok(())
    }

    /// Program to execute
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    /// Arguments passed to the program
    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }

    /// Expand `$VAR` / `${VAR}` references in command, working dir and env values
    fn expand_env_vars(&mut self) {
        self.command = self.command.iter().map(|s| expand_env(s)).collect();

        if let Some(ref dir) = self.working_dir {
            self.working_dir = Some(PathBuf::from(expand_env(&dir.to_string_lossy())));
        }

        self.environment = self
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), expand_env(v)))
            .collect();
    }
}

/// Expand environment variables in a string; unknown variables are left as-is
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => out.push_str(&value),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

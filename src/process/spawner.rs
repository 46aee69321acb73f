use crate::config::ProcessConfig;
use crate::error::{Result, VigilError};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Spawn a process based on the provided configuration
///
/// This function creates a new process using tokio::process::Command,
/// applying the configuration settings:
/// - Command-line arguments
/// - Working directory
/// - Environment variables (added to the inherited environment)
///
/// Standard streams are detached. The child is killed if its handle is
/// dropped without being waited on.
///
/// # Returns
/// * `Ok(SpawnedProcess)` - Successfully spawned process with metadata
/// * `Err(VigilError::SpawnError)` - Failed to spawn process
pub fn spawn_process(config: &ProcessConfig) -> Result<SpawnedProcess> {
    if config.command.is_empty() {
        return Err(VigilError::SpawnError(format!(
            "Process '{}' has no command",
            config.name
        )));
    }

    let mut command = Command::new(config.program());
    command.args(config.args());

    if let Some(ref dir) = config.working_dir {
        command.current_dir(dir);
    }

    command.envs(&config.environment);

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        VigilError::SpawnError(format!("Failed to spawn process '{}': {}", config.name, e))
    })?;

    let pid = child.id().ok_or_else(|| {
        VigilError::SpawnError(format!("Failed to get PID for process '{}'", config.name))
    })?;

    Ok(SpawnedProcess { child, pid })
}

use crate::error::VigilError;
use crate::process::monitor::ResourceSampler;
use crate::process::restart::{RestartDecision, RestartPolicy};
use crate::process::spawner::spawn_process;
use crate::process::types::{Instance, ProcessRecord, ProcessStatus};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default pause between two controller ticks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Default grace period between the interrupt signal and the forced kill
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// How a launch is justified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Launch {
    /// First launch, or first launch after being enabled
    Fresh,
    /// Relaunch approved by the restart policy
    Restart,
}

/// Per-process controller keeping one OS process alive under the restart policy
#[derive(Clone)]
pub struct Lifecycle {
    policy: RestartPolicy,
    sampler: Arc<dyn ResourceSampler>,
    tick_interval: Duration,
    stop_timeout: Duration,
}

impl Lifecycle {
    pub fn new(
        policy: RestartPolicy,
        sampler: Arc<dyn ResourceSampler>,
        tick_interval: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            policy,
            sampler,
            tick_interval,
            stop_timeout,
        }
    }

    /// Controller loop of one record; returns once `cancel` fires
    pub async fn run(self, record: Arc<ProcessRecord>, cancel: CancellationToken) {
        info!(process = %record.name(), "Starting controller");

        while !cancel.is_cancelled() {
            self.tick(&record, &cancel).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }

        debug!(process = %record.name(), "Controller stopped");
    }

    /// One controller pass: liveness self-check, then a policy-gated launch
    pub async fn tick(&self, record: &Arc<ProcessRecord>, cancel: &CancellationToken) {
        let (status, pid) = {
            let state = record.state.read().await;
            (state.status, state.pid)
        };

        if let (ProcessStatus::Running, Some(pid)) = (status, pid) {
            if !self.sampler.is_alive(pid) {
                warn!(process = %record.name(), pid, "Process is no longer alive");
                stop_instance(record).await;
            }
        }

        if cancel.is_cancelled() {
            return;
        }

        if let Some(launch) = self.launch_decision(record).await {
            self.start_instance(record, cancel, launch).await;
        }
    }

    async fn launch_decision(&self, record: &ProcessRecord) -> Option<Launch> {
        let state = record.state.read().await;
        if !state.enabled || !state.status.is_launchable() {
            return None;
        }
        if state.launch_pending {
            return Some(Launch::Fresh);
        }

        match self
            .policy
            .evaluate(record.config().restart_on_exit, &state.restart_history)
        {
            RestartDecision::Allow => Some(Launch::Restart),
            RestartDecision::Disabled => None,
            RestartDecision::LimitExceeded { recent } => {
                let reason = VigilError::RestartLimitExceeded(record.name().to_string());
                warn!(
                    process = %record.name(),
                    recent,
                    window = ?self.policy.window,
                    "{}, not restarting",
                    reason
                );
                None
            }
        }
    }

    async fn start_instance(
        &self,
        record: &Arc<ProcessRecord>,
        cancel: &CancellationToken,
        launch: Launch,
    ) {
        let mut slot = record.instance.lock().await;
        let mut state = record.state.write().await;

        // Re-check under the locks: a stop or disable may have raced the decision
        if !state.enabled || !state.status.is_launchable() {
            return;
        }

        info!(process = %record.name(), ?launch, "Starting process");
        state.transition(ProcessStatus::Starting);
        state.generation += 1;
        let generation = state.generation;

        let spawned = match spawn_process(record.config()) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!(process = %record.name(), error = %e, "Failed to start process");
                state.transition(ProcessStatus::Failed);
                state.last_error = Some(e.to_string());
                // Later attempts are policy-gated and count toward the window
                match launch {
                    Launch::Fresh => state.launch_pending = false,
                    Launch::Restart => {
                        state.restart_history.prune(self.policy.window, Instant::now());
                        state.restart_history.record();
                    }
                }
                return;
            }
        };

        let pid = spawned.pid;
        state.transition(ProcessStatus::Running);
        state.pid = Some(pid);
        state.started_at = Some(Utc::now());
        state.last_error = None;
        match launch {
            Launch::Fresh => state.launch_pending = false,
            Launch::Restart => {
                let now = Instant::now();
                state.restart_history.prune(self.policy.window, now);
                state.restart_history.record();
                state.restart_count += 1;
            }
        }
        drop(state);

        let token = cancel.child_token();
        let waiter = tokio::spawn(wait_for_exit(
            Arc::clone(record),
            spawned.child,
            generation,
            token.clone(),
            self.stop_timeout,
        ));

        *slot = Some(Instance {
            pid,
            generation,
            cancel: token,
            waiter,
        });

        info!(process = %record.name(), pid, "Process started");
    }
}

/// Exit waiter: owns the child until it exits or its token is cancelled.
///
/// Marks the record `Stopped` without relaunching; the next controller tick
/// makes that decision.
async fn wait_for_exit(
    record: Arc<ProcessRecord>,
    mut child: Child,
    generation: u64,
    cancel: CancellationToken,
    stop_timeout: Duration,
) {
    let exit = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };
    if exit.is_none() {
        terminate(record.name(), &mut child, stop_timeout).await;
    }

    let mut state = record.state.write().await;
    if state.generation != generation {
        return;
    }

    match exit {
        Some(Ok(status)) if status.success() => {
            info!(process = %record.name(), "Process exited normally");
        }
        Some(Ok(status)) => {
            let err = VigilError::ExitError(format!("{} exited with {}", record.name(), status));
            warn!(process = %record.name(), %status, "Process exited with error");
            state.last_error = Some(err.to_string());
        }
        Some(Err(e)) => {
            error!(process = %record.name(), error = %e, "Failed to wait for process");
            state.last_error = Some(VigilError::ExitError(e.to_string()).to_string());
        }
        None => debug!(process = %record.name(), "Process stopped on request"),
    }

    if state.status != ProcessStatus::Stopped {
        state.transition(ProcessStatus::Stopped);
    }
}

/// Interrupt, wait up to `timeout`, then kill
async fn terminate(name: &str, child: &mut Child, timeout: Duration) {
    // id() is None once the child has been reaped
    let Some(pid) = child.id() else {
        return;
    };

    if let Err(e) = send_interrupt(pid) {
        debug!(process = %name, pid, error = %e, "Interrupt not delivered");
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            info!(process = %name, pid, %status, "Process exited gracefully");
        }
        Ok(Err(e)) => {
            warn!(process = %name, pid, error = %e, "Wait failed during stop");
        }
        Err(_) => {
            warn!(
                process = %name,
                pid,
                "Process did not exit within {:?}, killing",
                timeout
            );
            if let Err(e) = child.kill().await {
                let err = VigilError::StopError(name.to_string(), e.to_string());
                error!(process = %name, pid, "{}", err);
            }
        }
    }
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> crate::error::Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT)
        .map_err(|e| VigilError::SignalError(format!("Failed to send SIGINT to {}: {}", pid, e)))
}

#[cfg(not(unix))]
fn send_interrupt(pid: u32) -> crate::error::Result<()> {
    Err(VigilError::SignalError(format!(
        "Interrupt is not supported on this platform (pid {})",
        pid
    )))
}

/// Stop the live instance of a record, if any, and mark it `Stopped`.
///
/// Idempotent: stopping a record without a live instance only settles its
/// status. Holds the instance slot for the whole sequence so no launch can
/// interleave.
pub async fn stop_instance(record: &ProcessRecord) {
    let mut slot = record.instance.lock().await;

    if let Some(instance) = slot.take() {
        info!(process = %record.name(), pid = instance.pid, "Stopping process");
        instance.cancel.cancel();
        if let Err(e) = instance.waiter.await {
            error!(
                process = %record.name(),
                generation = instance.generation,
                error = %e,
                "Exit waiter failed"
            );
        }
    }

    let mut state = record.state.write().await;
    if state.status != ProcessStatus::Stopped {
        state.transition(ProcessStatus::Stopped);
    }
}

/// Stop the current instance so the controller relaunches it, subject to policy
pub async fn request_stop(record: &ProcessRecord, reason: &str) {
    let generation = record.state.read().await.generation;
    request_stop_of(record, generation, reason).await;
}

/// Like `request_stop`, but only while `generation` is still the current instance
pub async fn request_stop_of(record: &ProcessRecord, generation: u64, reason: &str) {
    {
        let mut state = record.state.write().await;
        if state.generation != generation {
            debug!(process = %record.name(), reason, "Stop request for an older instance ignored");
            return;
        }
        state.transition(ProcessStatus::Restarting);
    }

    info!(process = %record.name(), reason, "Stop requested");
    stop_instance(record).await;
}

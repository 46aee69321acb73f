use crate::error::{Result, VigilError};
use crate::process::lifecycle;
use crate::process::restart::RestartPolicy;
use crate::process::types::{ProcessRecord, ProcessStatus};
use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

/// CPU and memory usage of one process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_mb: u64,
}

/// OS-specific source of per-PID usage figures
pub trait ResourceSampler: Send + Sync {
    fn sample(&self, pid: u32) -> Result<ResourceSample>;

    fn is_alive(&self, pid: u32) -> bool;
}

/// `ResourceSampler` backed by sysinfo.
///
/// CPU usage is computed against the previous refresh of the same PID, so
/// the first sample of a new process reads as 0%.
pub struct SystemSampler {
    system: Mutex<System>,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn refresh(system: &mut System, pid: Pid) {
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SystemSampler {
    fn sample(&self, pid: u32) -> Result<ResourceSample> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        Self::refresh(&mut system, sys_pid);

        let process = system
            .process(sys_pid)
            .ok_or_else(|| VigilError::SamplingError(pid, "process not found".to_string()))?;

        Ok(ResourceSample {
            cpu_percent: f64::from(process.cpu_usage()),
            memory_mb: process.memory() / 1024 / 1024,
        })
    }

    fn is_alive(&self, pid: u32) -> bool {
        let sys_pid = Pid::from_u32(pid);
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        Self::refresh(&mut system, sys_pid);

        system
            .process(sys_pid)
            .is_some_and(|p| !matches!(p.status(), sysinfo::ProcessStatus::Zombie | sysinfo::ProcessStatus::Dead))
    }
}

/// A configured ceiling that a sample went over
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitViolation {
    Cpu { current: f64, limit: f64 },
    Memory { current: u64, limit: u64 },
}

impl std::fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitViolation::Cpu { current, limit } => {
                write!(f, "CPU {:.2}% > {:.2}%", current, limit)
            }
            LimitViolation::Memory { current, limit } => {
                write!(f, "memory {} MB > {} MB", current, limit)
            }
        }
    }
}

/// Compare a sample against the ceilings; a ceiling of 0 is disabled
pub fn find_violations(max_cpu: f64, max_memory: u64, sample: &ResourceSample) -> Vec<LimitViolation> {
    let mut violations = Vec::new();

    if max_cpu > 0.0 && sample.cpu_percent > max_cpu {
        violations.push(LimitViolation::Cpu {
            current: sample.cpu_percent,
            limit: max_cpu,
        });
    }

    if max_memory > 0 && sample.memory_mb > max_memory {
        violations.push(LimitViolation::Memory {
            current: sample.memory_mb,
            limit: max_memory,
        });
    }

    violations
}

/// Sample one running record, store the figures and enforce its ceilings.
///
/// Sampling failures are logged and otherwise ignored.
pub async fn check_record(record: &ProcessRecord, sampler: &dyn ResourceSampler, policy: &RestartPolicy) {
    let (pid, generation) = {
        let state = record.state.read().await;
        match (state.status, state.pid) {
            (ProcessStatus::Running, Some(pid)) => (pid, state.generation),
            _ => return,
        }
    };

    let sample = match sampler.sample(pid) {
        Ok(sample) => sample,
        Err(e) => {
            warn!(process = %record.name(), pid, error = %e, "Failed to sample process");
            return;
        }
    };

    let config = record.config();
    let violations = find_violations(config.max_cpu, config.max_memory, &sample);

    let stop_requested = {
        let mut state = record.state.write().await;
        if state.generation != generation || state.status != ProcessStatus::Running {
            debug!(process = %record.name(), "Discarding stale resource sample");
            return;
        }

        state.cpu_percent = sample.cpu_percent;
        state.memory_mb = sample.memory_mb;

        if violations.is_empty() {
            return;
        }

        for violation in &violations {
            warn!(process = %record.name(), pid, %violation, "Process exceeded resource limit");
        }
        let error = VigilError::ResourceLimitExceeded(
            record.name().to_string(),
            violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        );
        state.last_error = Some(error.to_string());

        let decision = policy.evaluate(config.restart_on_exit, &state.restart_history);
        if !decision.is_allowed() {
            debug!(process = %record.name(), ?decision, "Resource violation not acted on");
        }
        decision.is_allowed()
    };

    if stop_requested {
        info!(process = %record.name(), "Restarting process due to resource usage");
        lifecycle::request_stop_of(record, generation, "resource limit").await;
    }
}

use crate::config::ProcessConfig;
use crate::process::health::HealthProbe;
use crate::process::restart::RestartHistory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Lifecycle status of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Stopped,
    Starting,
    Running,
    Unhealthy,
    Restarting,
    Failed,
}

impl ProcessStatus {
    /// Transition table of the lifecycle state machine.
    ///
    /// Staying in the same state is always allowed.
    pub fn can_transition_to(self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;

        if self == next || next == Restarting {
            return true;
        }

        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Unhealthy)
                | (Running, Stopped)
                | (Unhealthy, Running)
                | (Unhealthy, Stopped)
                | (Restarting, Stopped)
                | (Failed, Starting)
                | (Failed, Stopped)
        )
    }

    /// Whether an OS process may exist for this status
    pub fn has_live_process(self) -> bool {
        matches!(
            self,
            ProcessStatus::Starting | ProcessStatus::Running | ProcessStatus::Unhealthy
        )
    }

    /// Statuses from which the controller may launch a new instance
    pub fn is_launchable(self) -> bool {
        matches!(self, ProcessStatus::Stopped | ProcessStatus::Failed)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Unhealthy => write!(f, "unhealthy"),
            ProcessStatus::Restarting => write!(f, "restarting"),
            ProcessStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Mutable runtime state of one record, guarded by the record lock
#[derive(Debug, Clone)]
pub struct RecordState {
    pub status: ProcessStatus,
    pub enabled: bool,
    pub pid: Option<u32>,
    pub cpu_percent: f64,
    pub memory_mb: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: usize,
    pub restart_history: RestartHistory,
    pub last_error: Option<String>,
    pub last_health_check: Option<DateTime<Utc>>,
    /// Bumped on every launch so late observers of an older instance can be ignored
    pub generation: u64,
    /// The next launch is a fresh start rather than a policy-gated restart
    pub launch_pending: bool,
}

impl RecordState {
    pub fn new(enabled: bool) -> Self {
        Self {
            status: ProcessStatus::Stopped,
            enabled,
            pid: None,
            cpu_percent: 0.0,
            memory_mb: 0,
            started_at: None,
            restart_count: 0,
            restart_history: RestartHistory::new(),
            last_error: None,
            last_health_check: None,
            generation: 0,
            launch_pending: true,
        }
    }

    /// Move to `next` if the state machine allows it
    pub fn transition(&mut self, next: ProcessStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(from = %self.status, to = %next, "Rejected invalid status transition");
            return false;
        }

        self.status = next;
        if !next.has_live_process() {
            self.pid = None;
            self.cpu_percent = 0.0;
            self.memory_mb = 0;
        }
        true
    }
}

/// Handle to the live OS process of a record.
///
/// The child itself is owned by the exit-waiter task; cancelling `cancel`
/// asks that task to run the stop sequence.
#[derive(Debug)]
pub struct Instance {
    pub pid: u32,
    pub generation: u64,
    pub cancel: CancellationToken,
    pub waiter: JoinHandle<()>,
}

/// Runtime record of a configured, enabled process
pub struct ProcessRecord {
    config: ProcessConfig,
    probe: Option<Box<dyn HealthProbe>>,
    pub(crate) state: RwLock<RecordState>,
    pub(crate) instance: Mutex<Option<Instance>>,
}

impl std::fmt::Debug for ProcessRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRecord")
            .field("name", &self.config.name)
            .field("probe", &self.probe)
            .finish()
    }
}

impl ProcessRecord {
    pub fn new(config: ProcessConfig, probe: Option<Box<dyn HealthProbe>>) -> Self {
        let enabled = config.enabled;
        Self {
            config,
            probe,
            state: RwLock::new(RecordState::new(enabled)),
            instance: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn probe(&self) -> Option<&dyn HealthProbe> {
        self.probe.as_deref()
    }

    pub async fn status(&self) -> ProcessStatus {
        self.state.read().await.status
    }

    /// Copy of the current runtime state
    pub async fn state_snapshot(&self) -> RecordState {
        self.state.read().await.clone()
    }

    /// Full copy of the record for the query surface
    pub async fn info(&self) -> ProcessInfo {
        let state = self.state.read().await;
        ProcessInfo {
            name: self.config.name.clone(),
            config: self.config.clone(),
            status: state.status,
            pid: state.pid,
            cpu_percent: state.cpu_percent,
            memory_mb: state.memory_mb,
            start_time: state.started_at,
            restart_count: state.restart_count,
            restart_history: state.restart_history.timestamps(),
            last_health_check: state.last_health_check,
            enabled: state.enabled,
            last_error: state.last_error.clone(),
        }
    }

    /// Summary row for the detailed status report
    pub async fn detailed(&self) -> DetailedStatus {
        let state = self.state.read().await;
        DetailedStatus {
            status: state.status,
            pid: state.pid,
            cpu_percent: state.cpu_percent,
            memory_mb: state.memory_mb,
            start_time: state.started_at,
            restart_count: state.restart_count,
            last_health_check: state.last_health_check,
            enabled: state.enabled,
            last_error: state.last_error.clone(),
        }
    }
}

/// Copy of a process record returned by `get_process_info`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub config: ProcessConfig,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub cpu_percent: f64,
    pub memory_mb: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub restart_count: usize,
    pub restart_history: Vec<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub last_error: Option<String>,
}

/// Per-process entry of the detailed status report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedStatus {
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub cpu_percent: f64,
    pub memory_mb: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub restart_count: usize,
    pub last_health_check: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessStatus::*;

    const ALL: [ProcessStatus; 6] = [Stopped, Starting, Running, Unhealthy, Restarting, Failed];

    #[test]
    fn test_documented_transitions_allowed() {
        let allowed = [
            (Stopped, Starting),
            (Starting, Running),
            (Starting, Failed),
            (Running, Unhealthy),
            (Running, Stopped),
            (Unhealthy, Running),
            (Unhealthy, Stopped),
            (Restarting, Stopped),
            (Failed, Starting),
        ];
        for (from, to) in allowed {
            assert!(from.can_transition_to(to), "{} -> {} should be allowed", from, to);
        }
    }

    #[test]
    fn test_any_state_may_restart() {
        for from in ALL {
            assert!(from.can_transition_to(Restarting));
        }
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let rejected = [
            (Stopped, Running),
            (Stopped, Unhealthy),
            (Starting, Unhealthy),
            (Restarting, Running),
            (Restarting, Starting),
            (Failed, Running),
            (Running, Starting),
        ];
        for (from, to) in rejected {
            assert!(!from.can_transition_to(to), "{} -> {} should be rejected", from, to);
        }
    }

    #[test]
    fn test_transition_clears_pid_when_stopped() {
        let mut state = RecordState::new(true);
        assert!(state.transition(Starting));
        state.pid = Some(42);
        state.memory_mb = 12;
        assert!(state.transition(Running));
        assert_eq!(state.pid, Some(42));

        assert!(state.transition(Stopped));
        assert_eq!(state.pid, None);
        assert_eq!(state.memory_mb, 0);
    }

    #[test]
    fn test_rejected_transition_keeps_state() {
        let mut state = RecordState::new(true);
        assert!(!state.transition(Running));
        assert_eq!(state.status, Stopped);
    }

    #[test]
    fn test_launchable_statuses() {
        let launchable: Vec<_> = ALL.iter().filter(|s| s.is_launchable()).collect();
        assert_eq!(launchable, vec![&Stopped, &Failed]);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Unhealthy).unwrap(), "\"unhealthy\"");
        assert_eq!(Running.to_string(), "running");
    }

    #[tokio::test]
    async fn test_new_record_is_stopped() {
        let config = ProcessConfig {
            name: "idle".to_string(),
            command: vec!["/bin/true".to_string()],
            enabled: true,
            ..Default::default()
        };
        let record = ProcessRecord::new(config, None);

        let info = record.info().await;
        assert_eq!(info.status, Stopped);
        assert_eq!(info.pid, None);
        assert!(info.enabled);
        assert_eq!(info.restart_count, 0);
        assert!(record.probe().is_none());
    }
}

use crate::config::SupervisorConfig;
use crate::error::{Result, VigilError};
use crate::process::health::{self, build_probe};
use crate::process::lifecycle::{self, Lifecycle, DEFAULT_STOP_TIMEOUT, DEFAULT_TICK_INTERVAL};
use crate::process::monitor::{self, ResourceSampler, SystemSampler};
use crate::process::restart::RestartPolicy;
use crate::process::types::{DetailedStatus, ProcessInfo, ProcessRecord, ProcessStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Tuning knobs that are not part of the configuration file
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Pause between two lifecycle controller ticks
    pub controller_tick: Duration,
    /// Grace period between interrupt and kill when stopping a child
    pub stop_timeout: Duration,
    /// Upper bound on probes and samplings running at once per monitoring tick
    pub max_concurrent_checks: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            controller_tick: DEFAULT_TICK_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            max_concurrent_checks: 16,
        }
    }
}

/// Answer of `get_detailed_status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedReport {
    pub processes: BTreeMap<String, DetailedStatus>,
    pub monitor_uptime_secs: u64,
}

/// Aggregate health: healthy iff every supervised process is running
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub status: BTreeMap<String, ProcessStatus>,
}

/// Shared state of the monitoring loop
#[derive(Clone)]
struct Checks {
    policy: RestartPolicy,
    sampler: Arc<dyn ResourceSampler>,
    permits: Arc<Semaphore>,
}

/// Facade owning every process record and the tasks that supervise them.
///
/// One controller task per record keeps its process alive; one monitoring
/// task runs health probes and resource sampling on the global
/// `check_interval`.
pub struct Supervisor {
    config: SupervisorConfig,
    records: RwLock<BTreeMap<String, Arc<ProcessRecord>>>,
    policy: RestartPolicy,
    sampler: Arc<dyn ResourceSampler>,
    options: SupervisorOptions,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    started_at: OnceLock<Instant>,
}

impl Supervisor {
    /// Create a supervisor with default options and the sysinfo sampler
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        Self::with_options(
            config,
            SupervisorOptions::default(),
            Arc::new(SystemSampler::new()),
        )
    }

    /// Create a supervisor with explicit options and resource sampler
    ///
    /// # Arguments
    /// * `config` - Supervisor configuration; defaults are applied and it is validated
    /// * `options` - Controller tick, stop timeout and check fan-out
    /// * `sampler` - Source of per-PID CPU and memory figures
    ///
    /// # Returns
    /// * `Ok(Supervisor)` - One record per enabled process, all `Stopped`
    /// * `Err(VigilError)` - Invalid configuration or health check block
    pub fn with_options(
        mut config: SupervisorConfig,
        options: SupervisorOptions,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Result<Self> {
        config.apply_defaults();
        config.validate()?;

        let mut records = BTreeMap::new();
        for process in config.enabled_processes() {
            let probe = process
                .health_check
                .as_ref()
                .map(build_probe)
                .transpose()
                .map_err(|e| {
                    VigilError::ConfigError(format!(
                        "Invalid health check for {}: {}",
                        process.name, e
                    ))
                })?;

            records.insert(
                process.name.clone(),
                Arc::new(ProcessRecord::new(process.clone(), probe)),
            );
        }

        let policy = RestartPolicy::new(config.max_restarts, config.restart_window);

        Ok(Self {
            config,
            records: RwLock::new(records),
            policy,
            sampler,
            options,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            started_at: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Launch the monitoring loop and one controller per record.
    ///
    /// Returns immediately; only the first call has an effect.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Supervisor already started");
            return;
        }
        let _ = self.started_at.set(Instant::now());

        let records = self.snapshot_records().await;
        let lifecycle = Lifecycle::new(
            self.policy,
            Arc::clone(&self.sampler),
            self.options.controller_tick,
            self.options.stop_timeout,
        );

        let mut tasks = self.tasks.lock().await;
        for record in &records {
            tasks.push(tokio::spawn(
                lifecycle
                    .clone()
                    .run(Arc::clone(record), self.cancel.clone()),
            ));
        }

        let checks = Checks {
            policy: self.policy,
            sampler: Arc::clone(&self.sampler),
            permits: Arc::new(Semaphore::new(self.options.max_concurrent_checks.max(1))),
        };
        tasks.push(tokio::spawn(run_monitoring(
            records,
            checks,
            self.config.check_interval,
            self.cancel.clone(),
        )));

        info!(
            processes = tasks.len() - 1,
            check_interval = ?self.config.check_interval,
            "Supervisor started"
        );
    }

    /// Cancel every task, wait for them, then stop any remaining process.
    ///
    /// Blocks until fully quiesced. Calling it again is a no-op.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Stopping supervisor");
        self.cancel.cancel();

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Supervisor task failed");
            }
        }

        for record in self.snapshot_records().await {
            lifecycle::stop_instance(&record).await;
        }

        info!("Supervisor stopped");
    }

    /// Time since `start`, zero if never started
    pub fn uptime(&self) -> Duration {
        self.started_at
            .get()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    /// Status of every supervised process
    pub async fn get_status(&self) -> BTreeMap<String, ProcessStatus> {
        let mut status = BTreeMap::new();
        for record in self.snapshot_records().await {
            status.insert(record.name().to_string(), record.status().await);
        }
        status
    }

    /// Per-process runtime details plus the supervisor uptime
    pub async fn get_detailed_status(&self) -> DetailedReport {
        let mut processes = BTreeMap::new();
        for record in self.snapshot_records().await {
            processes.insert(record.name().to_string(), record.detailed().await);
        }

        DetailedReport {
            processes,
            monitor_uptime_secs: self.uptime().as_secs(),
        }
    }

    pub async fn get_process_info(&self, name: &str) -> Result<ProcessInfo> {
        Ok(self.record(name).await?.info().await)
    }

    /// Stop the process now; the controller relaunches it if the policy allows
    pub async fn restart_process(&self, name: &str) -> Result<()> {
        let record = self.record(name).await?;
        info!(process = %name, "Manual restart requested");
        lifecycle::request_stop(&record, "manual restart").await;
        Ok(())
    }

    /// Re-enable a process; the next controller tick launches it
    pub async fn enable_process(&self, name: &str) -> Result<()> {
        let record = self.record(name).await?;
        let mut state = record.state.write().await;
        if !state.enabled {
            state.enabled = true;
            state.launch_pending = true;
            info!(process = %name, "Process enabled");
        }
        Ok(())
    }

    /// Disable a process and stop it; the record stays queryable
    pub async fn disable_process(&self, name: &str) -> Result<()> {
        let record = self.record(name).await?;
        record.state.write().await.enabled = false;
        info!(process = %name, "Process disabled");
        lifecycle::stop_instance(&record).await;
        Ok(())
    }

    /// Aggregate health over `get_status`
    pub async fn health(&self) -> HealthReport {
        let status = self.get_status().await;
        HealthReport {
            healthy: status.values().all(|s| *s == ProcessStatus::Running),
            status,
        }
    }

    async fn record(&self, name: &str) -> Result<Arc<ProcessRecord>> {
        self.records
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| VigilError::ProcessNotFound(name.to_string()))
    }

    async fn snapshot_records(&self) -> Vec<Arc<ProcessRecord>> {
        self.records.read().await.values().cloned().collect()
    }
}

/// Global tick driving health probes and resource sampling
async fn run_monitoring(
    records: Vec<Arc<ProcessRecord>>,
    checks: Checks,
    check_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + check_interval, check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // In-flight checks finish before cancellation is observed
        run_checks(&records, &checks).await;
    }

    debug!("Monitoring loop stopped");
}

async fn run_checks(records: &[Arc<ProcessRecord>], checks: &Checks) {
    let mut set = JoinSet::new();

    for record in records {
        if record.probe().is_some() {
            let record = Arc::clone(record);
            let checks = checks.clone();
            set.spawn(async move {
                let Ok(_permit) = checks.permits.acquire_owned().await else {
                    return;
                };
                health::check_record(&record, &checks.policy).await;
            });
        }

        let record = Arc::clone(record);
        let checks = checks.clone();
        set.spawn(async move {
            let Ok(_permit) = checks.permits.acquire_owned().await else {
                return;
            };
            monitor::check_record(&record, checks.sampler.as_ref(), &checks.policy).await;
        });
    }

    while let Some(result) = set.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Check task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessConfig;

    fn process(name: &str, enabled: bool) -> ProcessConfig {
        ProcessConfig {
            name: name.to_string(),
            command: vec!["/bin/sleep".to_string(), "30".to_string()],
            enabled,
            ..Default::default()
        }
    }

    fn config(processes: Vec<ProcessConfig>) -> SupervisorConfig {
        SupervisorConfig {
            processes,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_only_enabled_processes_registered() {
        let supervisor =
            Supervisor::new(config(vec![process("web", true), process("batch", false)])).unwrap();

        let status = supervisor.get_status().await;
        assert_eq!(status.len(), 1);
        assert_eq!(status["web"], ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = Supervisor::new(config(vec![process("web", true), process("web", true)]));
        assert!(matches!(result, Err(VigilError::ConfigValidationError(_))));
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let supervisor = Supervisor::new(config(vec![process("web", true)])).unwrap();

        assert!(supervisor.get_process_info("missing").await.unwrap_err().is_not_found());
        assert!(supervisor.restart_process("missing").await.unwrap_err().is_not_found());
        assert!(supervisor.enable_process("missing").await.unwrap_err().is_not_found());
        assert!(supervisor.disable_process("missing").await.unwrap_err().is_not_found());

        let info = supervisor.get_process_info("web").await.unwrap();
        assert_eq!(info.status, ProcessStatus::Stopped);
        assert_eq!(info.restart_count, 0);
    }

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let supervisor = Supervisor::new(config(Vec::new())).unwrap();
        let report = supervisor.health().await;
        assert!(report.healthy);
        assert!(report.status.is_empty());
    }

    #[tokio::test]
    async fn test_stopped_process_is_unhealthy() {
        let supervisor = Supervisor::new(config(vec![process("web", true)])).unwrap();
        assert!(!supervisor.health().await.healthy);
    }

    #[tokio::test]
    async fn test_uptime_zero_before_start() {
        let supervisor = Supervisor::new(config(Vec::new())).unwrap();
        assert_eq!(supervisor.get_detailed_status().await.monitor_uptime_secs, 0);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let supervisor = Supervisor::new(config(vec![process("web", true)])).unwrap();
        supervisor.stop().await;
        supervisor.stop().await;
        assert_eq!(supervisor.get_status().await["web"], ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn test_disable_then_enable_sets_pending_launch() {
        let supervisor = Supervisor::new(config(vec![process("web", true)])).unwrap();
        let record = supervisor.record("web").await.unwrap();
        record.state.write().await.launch_pending = false;

        supervisor.disable_process("web").await.unwrap();
        assert!(!supervisor.get_process_info("web").await.unwrap().enabled);

        supervisor.enable_process("web").await.unwrap();
        let state = record.state_snapshot().await;
        assert!(state.enabled);
        assert!(state.launch_pending);
    }
}

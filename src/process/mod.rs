// Process module - supervision of external commands

pub mod health;
pub mod lifecycle;
pub mod monitor;
pub mod restart;
pub mod spawner;
pub mod supervisor;
pub mod types;

pub use health::{build_probe, CommandProbe, HealthProbe, HttpProbe, TcpProbe};
pub use monitor::{ResourceSample, ResourceSampler, SystemSampler};
pub use restart::{RestartDecision, RestartHistory, RestartPolicy};
pub use spawner::{spawn_process, SpawnedProcess};
pub use supervisor::{DetailedReport, HealthReport, Supervisor, SupervisorOptions};
pub use types::{DetailedStatus, ProcessInfo, ProcessRecord, ProcessStatus};

pub mod runtime;
pub mod docker;
pub mod classifier;
pub mod credentials;
pub mod strategy;
pub mod archive;
pub mod report;
pub mod orchestrator;

pub use archive::{ArchiveResult, VolumeArchiver};
pub use classifier::{ContainerInfo, EngineKind, Role};
pub use docker::DockerRuntime;
pub use orchestrator::{discover, run_backup, BackupOrchestrator};
pub use report::{RunReport, RunStatus};
pub use runtime::{ContainerRuntime, RuntimeError};

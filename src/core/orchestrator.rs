/// Backup run orchestration
///
/// A run walks a fixed sequence of phases:
///
/// ```text
/// Discovering -> StoppingApplications -> BackingUpDatabases
///   -> StoppingDatabases -> ArchivingVolumes -> RestartingAll -> Done
/// ```
///
/// The run state is a plain value handed from phase to phase. Every runtime
/// call is awaited before the next one starts. Per-container failures are
/// recorded and the run goes on; losing the runtime connection skips straight
/// to `RestartingAll` so whatever was stopped gets a chance to come back.

use chrono::Local;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::core::archive::{ArchiveResult, VolumeArchiver};
use crate::core::classifier::{classify, ContainerInfo};
use crate::core::credentials;
use crate::core::report::{ContainerStateFailure, RunReport, RunStatus, StateOperation};
use crate::core::runtime::{ContainerRuntime, RuntimeError};
use crate::core::strategy::{try_backup, BackupError, BackupResult, DumpOptions};
use crate::utils::{
    file_timestamp, format_bytes, BackupConfig, VOLUMES_ARCHIVE_EXTENSION, VOLUMES_ARCHIVE_PREFIX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovering,
    StoppingApplications,
    BackingUpDatabases,
    StoppingDatabases,
    ArchivingVolumes,
    RestartingAll,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Discovering => "discovery",
            Phase::StoppingApplications => "stopping applications",
            Phase::BackingUpDatabases => "database backups",
            Phase::StoppingDatabases => "stopping databases",
            Phase::ArchivingVolumes => "volume archive",
            Phase::RestartingAll => "restart",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Everything a run has learned and done so far
#[derive(Debug)]
pub struct RunState {
    pub phase: Phase,
    /// Containers found running at discovery, in discovery order
    pub containers: Vec<ContainerInfo>,
    /// Containers this run stopped, in stop order
    pub stopped: Vec<ContainerInfo>,
    pub backups: Vec<BackupResult>,
    pub archive: ArchiveResult,
    pub state_failures: Vec<ContainerStateFailure>,
    pub restarted: Vec<String>,
    pub fatal: Option<String>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: Phase::Discovering,
            containers: Vec::new(),
            stopped: Vec::new(),
            backups: Vec::new(),
            archive: ArchiveResult::NotRun,
            state_failures: Vec::new(),
            restarted: Vec::new(),
            fatal: None,
        }
    }
}

impl RunState {
    pub fn is_aborted(&self) -> bool {
        self.fatal.is_some()
    }

    pub fn databases(&self) -> impl Iterator<Item = &ContainerInfo> {
        self.containers.iter().filter(|c| c.is_database())
    }

    pub fn applications(&self) -> impl Iterator<Item = &ContainerInfo> {
        self.containers.iter().filter(|c| !c.is_database())
    }

    /// Some per-container step failed but the run carries on
    pub fn is_degraded(&self) -> bool {
        self.backups.iter().any(|b| !b.success)
            || !self.state_failures.is_empty()
            || matches!(self.archive, ArchiveResult::Failed { .. })
    }

    fn was_stopped(&self, id: &str) -> bool {
        self.stopped.iter().any(|c| c.id == id)
    }

    fn abort(&mut self, error: impl fmt::Display) {
        error!(phase = %self.phase, error = %error, "aborting run");
        self.fatal = Some(format!("{} failed: {}", self.phase, error));
    }

    fn record_state_failure(&mut self, container: &ContainerInfo, operation: StateOperation, error: &RuntimeError) {
        self.state_failures.push(ContainerStateFailure {
            container: container.name.clone(),
            operation,
            message: error.to_string(),
        });
    }

    /// Phase to enter once the current one has finished
    fn next_phase(&self) -> Phase {
        match self.phase {
            Phase::RestartingAll | Phase::Done => Phase::Done,
            _ if self.is_aborted() => Phase::RestartingAll,
            Phase::Discovering if self.containers.is_empty() => Phase::Done,
            Phase::Discovering => Phase::StoppingApplications,
            Phase::StoppingApplications => Phase::BackingUpDatabases,
            Phase::BackingUpDatabases => Phase::StoppingDatabases,
            Phase::StoppingDatabases => Phase::ArchivingVolumes,
            Phase::ArchivingVolumes => Phase::RestartingAll,
        }
    }
}

/// List running containers and classify them
pub async fn discover(runtime: &dyn ContainerRuntime) -> Result<Vec<ContainerInfo>, RuntimeError> {
    let raw = runtime.list_running().await?;
    Ok(classify(raw))
}

pub struct BackupOrchestrator<'a> {
    runtime: &'a dyn ContainerRuntime,
    config: &'a BackupConfig,
    archiver: VolumeArchiver,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, config: &'a BackupConfig) -> Self {
        Self {
            runtime,
            config,
            archiver: VolumeArchiver::new(),
        }
    }

    /// Execute one full run. Always returns a report, even when aborted.
    pub async fn run(&self) -> RunReport {
        let started_at = Local::now();
        let options = DumpOptions {
            destination_dir: self.config.destination_directory.clone(),
            timestamp: file_timestamp(started_at),
            timeout: self.config.dump_timeout,
            database_only: self.config.database_only,
        };

        info!(destination = %options.destination_dir.display(), timestamp = %options.timestamp, "backup run started");

        let mut state = RunState::default();
        while state.phase != Phase::Done {
            debug!(phase = %state.phase, degraded = state.is_degraded(), "entering phase");
            state = match state.phase {
                Phase::Discovering => self.discover(state).await,
                Phase::StoppingApplications => self.stop_applications(state).await,
                Phase::BackingUpDatabases => self.backup_databases(state, &options).await,
                Phase::StoppingDatabases => self.stop_databases(state).await,
                Phase::ArchivingVolumes => self.archive_volumes(state, &options).await,
                Phase::RestartingAll => self.restart_all(state).await,
                Phase::Done => state,
            };
            state.phase = state.next_phase();
        }

        finish(state, started_at)
    }

    async fn discover(&self, mut state: RunState) -> RunState {
        let destination = &self.config.destination_directory;
        if let Err(e) = tokio::fs::create_dir_all(destination).await {
            state.abort(format!("cannot create destination {}: {}", destination.display(), e));
            return state;
        }

        match discover(self.runtime).await {
            Ok(containers) => {
                for container in &containers {
                    match container.engine() {
                        Some(engine) => info!(container = %container.name, image = %container.image, engine = %engine, "found database"),
                        None => debug!(container = %container.name, image = %container.image, "found application"),
                    }
                }
                if containers.is_empty() {
                    info!("no running containers, nothing to back up");
                }
                state.containers = containers;
            }
            Err(e) => state.abort(e),
        }
        state
    }

    async fn stop_applications(&self, state: RunState) -> RunState {
        let applications: Vec<ContainerInfo> = state.applications().cloned().collect();
        self.stop_all(state, applications).await
    }

    async fn stop_databases(&self, state: RunState) -> RunState {
        let databases: Vec<ContainerInfo> = state.databases().cloned().collect();
        self.stop_all(state, databases).await
    }

    async fn stop_all(&self, mut state: RunState, containers: Vec<ContainerInfo>) -> RunState {
        for container in containers {
            match self.runtime.stop(&container.id).await {
                Ok(()) => {
                    info!(container = %container.name, "stopped");
                    state.stopped.push(container);
                }
                Err(e) if e.is_connectivity() => {
                    state.abort(e);
                    break;
                }
                Err(e) => {
                    warn!(container = %container.name, error = %e, "failed to stop container");
                    state.record_state_failure(&container, StateOperation::Stop, &e);
                }
            }
        }
        state
    }

    async fn backup_databases(&self, mut state: RunState, options: &DumpOptions) -> RunState {
        let databases: Vec<ContainerInfo> = state.databases().cloned().collect();

        for container in databases {
            let outcome = match credentials::extract(&container) {
                Ok(creds) => try_backup(self.runtime, &container, &creds, options).await,
                Err(e) => Err(BackupError::from(e)),
            };

            let result = match outcome {
                Ok((path, bytes)) => {
                    info!(container = %container.name, path = %path.display(), size = %format_bytes(bytes), "backup complete");
                    BackupResult::succeeded(&container, path, bytes)
                }
                Err(e) => {
                    warn!(container = %container.name, error = %e, "backup failed");
                    if e.is_connectivity() {
                        state.abort(&e);
                    }
                    BackupResult::failed(&container, &e)
                }
            };

            state.backups.push(result);
            if state.is_aborted() {
                break;
            }
        }
        state
    }

    async fn archive_volumes(&self, mut state: RunState, options: &DumpOptions) -> RunState {
        let still_running: Vec<&str> = state
            .databases()
            .filter(|c| !state.was_stopped(&c.id))
            .map(|c| c.name.as_str())
            .collect();
        if !still_running.is_empty() {
            let error = format!("skipped while databases are still running: {}", still_running.join(", "));
            warn!("{}", error);
            state.archive = ArchiveResult::Failed { source: None, error };
            return state;
        }

        let source = match &self.config.volumes_dir {
            Some(dir) => dir.clone(),
            None => match self.runtime.volumes_root().await {
                Ok(dir) => dir,
                Err(e) if e.is_connectivity() => {
                    state.archive = ArchiveResult::Failed { source: None, error: e.to_string() };
                    state.abort(e);
                    return state;
                }
                Err(e) => {
                    warn!(error = %e, "cannot resolve volume root");
                    state.archive = ArchiveResult::Failed { source: None, error: e.to_string() };
                    return state;
                }
            },
        };

        let destination = options.destination_dir.join(format!(
            "{}-{}.{}",
            VOLUMES_ARCHIVE_PREFIX, options.timestamp, VOLUMES_ARCHIVE_EXTENSION
        ));
        info!(source = %source.display(), path = %destination.display(), "archiving volumes");

        state.archive = self.archiver.archive(&source, &destination).await;
        state
    }

    async fn restart_all(&self, mut state: RunState) -> RunState {
        let (databases, applications): (Vec<ContainerInfo>, Vec<ContainerInfo>) =
            state.stopped.iter().cloned().partition(|c| c.is_database());

        for container in databases.into_iter().chain(applications) {
            match self.runtime.start(&container.id).await {
                Ok(()) => {
                    info!(container = %container.name, "started");
                    state.restarted.push(container.name.clone());
                }
                Err(e) => {
                    error!(container = %container.name, error = %e, "CRITICAL: container did not restart, start it manually");
                    state.record_state_failure(&container, StateOperation::Start, &e);
                }
            }
        }
        state
    }
}

/// Run one backup with the given runtime and configuration
pub async fn run_backup(runtime: &dyn ContainerRuntime, config: &BackupConfig) -> RunReport {
    BackupOrchestrator::new(runtime, config).run().await
}

fn finish(mut state: RunState, started_at: chrono::DateTime<Local>) -> RunReport {
    // Every database gets a result, even the ones an abort never reached
    let attempted: HashSet<String> = state.backups.iter().map(|b| b.container_id.clone()).collect();
    let skipped: Vec<ContainerInfo> = state
        .databases()
        .filter(|c| !attempted.contains(&c.id))
        .cloned()
        .collect();
    for container in skipped {
        let error = BackupError::NotAttempted("run aborted before this backup".to_string());
        state.backups.push(BackupResult::failed(&container, &error));
    }

    let mut report = RunReport {
        started_at,
        finished_at: Local::now(),
        discovered: state.containers.iter().map(|c| c.name.clone()).collect(),
        backups: state.backups,
        archive: state.archive,
        state_failures: state.state_failures,
        restarted: state.restarted,
        fatal_error: state.fatal,
        degraded: false,
        status: RunStatus::Success,
    };
    report.resolve_status();

    match report.status {
        RunStatus::Success => info!(backups = report.backups.len(), "backup run finished"),
        RunStatus::PartialFailure => warn!(
            succeeded = report.successful_backups(),
            failed = report.failed_backups(),
            state_failures = report.state_failures.len(),
            "backup run finished with failures"
        ),
        RunStatus::Aborted => error!(error = report.fatal_error.as_deref().unwrap_or_default(), "backup run aborted"),
    }
    report
}

/// Run report
///
/// Everything a run did, in a form the CLI can print or serialize.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

use crate::core::archive::ArchiveResult;
use crate::core::strategy::BackupResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialFailure,
    Aborted,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::PartialFailure => 1,
            RunStatus::Aborted => 2,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Success => "success",
            RunStatus::PartialFailure => "partial failure",
            RunStatus::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateOperation {
    Stop,
    Start,
}

impl fmt::Display for StateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateOperation::Stop => f.write_str("stop"),
            StateOperation::Start => f.write_str("start"),
        }
    }
}

/// A container that could not be stopped or started
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerStateFailure {
    pub container: String,
    pub operation: StateOperation,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    /// Names of the containers discovered as running
    pub discovered: Vec<String>,
    pub backups: Vec<BackupResult>,
    pub archive: ArchiveResult,
    pub state_failures: Vec<ContainerStateFailure>,
    /// Names of containers started again at the end of the run
    pub restarted: Vec<String>,
    pub fatal_error: Option<String>,
    /// A per-container step failed and the run went on
    pub degraded: bool,
    pub status: RunStatus,
}

impl RunReport {
    /// Report for a run that never reached the container runtime
    pub fn aborted(started_at: DateTime<Local>, error: impl fmt::Display) -> Self {
        let mut report = Self {
            started_at,
            finished_at: Local::now(),
            discovered: Vec::new(),
            backups: Vec::new(),
            archive: ArchiveResult::NotRun,
            state_failures: Vec::new(),
            restarted: Vec::new(),
            fatal_error: Some(format!("discovery failed: {}", error)),
            degraded: false,
            status: RunStatus::Aborted,
        };
        report.resolve_status();
        report
    }

    /// Derive the overall status from the collected outcomes
    pub fn resolve_status(&mut self) {
        self.degraded = self.backups.iter().any(|b| !b.success)
            || !self.state_failures.is_empty()
            || matches!(self.archive, ArchiveResult::Failed { .. });
        self.status = if self.fatal_error.is_some() {
            RunStatus::Aborted
        } else if self.degraded {
            RunStatus::PartialFailure
        } else {
            RunStatus::Success
        };
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn successful_backups(&self) -> usize {
        self.backups.iter().filter(|b| b.success).count()
    }

    pub fn failed_backups(&self) -> usize {
        self.backups.len() - self.successful_backups()
    }

    /// Containers that did not come back up
    pub fn start_failures(&self) -> impl Iterator<Item = &ContainerStateFailure> {
        self.state_failures
            .iter()
            .filter(|f| f.operation == StateOperation::Start)
    }

    pub fn duration_secs(&self) -> u64 {
        (self.finished_at - self.started_at).num_seconds().max(0) as u64
    }
}

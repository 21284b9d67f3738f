/// Volume archiving
///
/// Packs the runtime's volume storage root into one gzip-compressed tar.
/// Callers must only invoke it once every database container is stopped.

use chrono::{DateTime, Local};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::utils::format_bytes;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("volume root {} is not readable: {source}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write archive {}: {source}", .path.display())]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("archiving failed: {0}")]
    Io(#[from] io::Error),
    #[error("archive task aborted: {0}")]
    Task(String),
}

/// Outcome of the archiving step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArchiveResult {
    Archived {
        source: PathBuf,
        path: PathBuf,
        bytes: u64,
        finished_at: DateTime<Local>,
    },
    Failed {
        source: Option<PathBuf>,
        error: String,
    },
    /// The run ended before the archiving step
    NotRun,
}

impl ArchiveResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ArchiveResult::Archived { .. })
    }
}

pub struct VolumeArchiver {
    compression: Compression,
}

impl Default for VolumeArchiver {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeArchiver {
    pub fn new() -> Self {
        Self {
            compression: Compression::default(),
        }
    }

    /// Archive `source_dir` into `destination`, off the async executor
    pub async fn archive(&self, source_dir: &Path, destination: &Path) -> ArchiveResult {
        let source = source_dir.to_path_buf();
        let dest = destination.to_path_buf();
        let compression = self.compression;

        let outcome = tokio::task::spawn_blocking(move || write_archive(&source, &dest, compression))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))
            .and_then(|r| r);

        match outcome {
            Ok(bytes) => {
                info!(source = %source_dir.display(), path = %destination.display(), size = %format_bytes(bytes), "volumes archived");
                ArchiveResult::Archived {
                    source: source_dir.to_path_buf(),
                    path: destination.to_path_buf(),
                    bytes,
                    finished_at: Local::now(),
                }
            }
            Err(e) => {
                warn!(source = %source_dir.display(), error = %e, "volume archive failed");
                if let Err(remove_err) = std::fs::remove_file(destination) {
                    if remove_err.kind() != io::ErrorKind::NotFound {
                        warn!(path = %destination.display(), error = %remove_err, "could not remove partial archive");
                    }
                }
                ArchiveResult::Failed {
                    source: Some(source_dir.to_path_buf()),
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Synchronous body of the archive step, returns the archive size
pub fn write_archive(source: &Path, destination: &Path, compression: Compression) -> Result<u64, ArchiveError> {
    std::fs::read_dir(source).map_err(|e| ArchiveError::SourceUnreadable {
        path: source.to_path_buf(),
        source: e,
    })?;

    let file = File::create(destination).map_err(|e| ArchiveError::DestinationUnwritable {
        path: destination.to_path_buf(),
        source: e,
    })?;

    let encoder = GzEncoder::new(BufWriter::new(file), compression);
    let mut builder = tar::Builder::new(encoder);
    // Volumes routinely hold symlinks pointing inside the container filesystem
    builder.follow_symlinks(false);

    let root_name = source
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("volumes"));
    builder.append_dir_all(&root_name, source)?;

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    drop(writer);

    Ok(std::fs::metadata(destination)?.len())
}

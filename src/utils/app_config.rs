/// Backup configuration management
///
/// Settings are layered: built-in defaults, then the optional
/// ~/.config/dockerbk/config.toml, then DOCKERBK_* environment variables
/// (a local .env file is honoured by the binary), then command-line flags.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{is_dir_writable, settings, DEFAULT_STOP_TIMEOUT};

/// Effective settings for one backup run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupConfig {
    /// Where dumps and the volumes archive are written
    pub destination_directory: PathBuf,
    pub verbose: bool,
    /// Overrides the volumes root reported by the daemon
    pub volumes_dir: Option<PathBuf>,
    /// Upper bound for a single dump; unbounded when unset
    #[serde(with = "humantime_opt")]
    pub dump_timeout: Option<Duration>,
    #[serde(with = "humantime_opt")]
    pub stop_timeout: Option<Duration>,
    /// Dump only the database named by the container instead of the whole instance
    pub database_only: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            destination_directory: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            verbose: false,
            volumes_dir: None,
            dump_timeout: None,
            stop_timeout: Some(DEFAULT_STOP_TIMEOUT),
            database_only: false,
        }
    }
}

/// On-disk form of the configuration, every key optional
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub destination_directory: Option<PathBuf>,
    pub verbose: Option<bool>,
    pub volumes_dir: Option<PathBuf>,
    /// Human readable duration, e.g. "30m"
    pub dump_timeout: Option<String>,
    pub stop_timeout: Option<String>,
    pub database_only: Option<bool>,
}

impl ConfigFile {
    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("dockerbk");
        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from file, `None` when it does not exist
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Some(config))
    }
}

impl BackupConfig {
    /// Defaults overlaid with the user config file and the process environment
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let path = ConfigFile::config_path()?;
        if let Some(file) = ConfigFile::load_from(&path)? {
            config.apply_file(file)?;
        }

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_file(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(dir) = file.destination_directory {
            self.destination_directory = dir;
        }
        if let Some(verbose) = file.verbose {
            self.verbose = verbose;
        }
        if file.volumes_dir.is_some() {
            self.volumes_dir = file.volumes_dir;
        }
        if let Some(timeout) = file.dump_timeout {
            self.dump_timeout = Some(parse_duration("dump_timeout", &timeout)?);
        }
        if let Some(timeout) = file.stop_timeout {
            self.stop_timeout = Some(parse_duration("stop_timeout", &timeout)?);
        }
        if let Some(database_only) = file.database_only {
            self.database_only = database_only;
        }
        Ok(())
    }

    /// Apply DOCKERBK_* variables from the given lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(settings::DESTINATION) {
            self.destination_directory = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(settings::VOLUMES_DIR) {
            self.volumes_dir = Some(PathBuf::from(dir));
        }
        if let Some(timeout) = lookup(settings::DUMP_TIMEOUT) {
            self.dump_timeout = Some(parse_duration(settings::DUMP_TIMEOUT, &timeout)?);
        }
        if let Some(timeout) = lookup(settings::STOP_TIMEOUT) {
            self.stop_timeout = Some(parse_duration(settings::STOP_TIMEOUT, &timeout)?);
        }
        if let Some(verbose) = lookup(settings::VERBOSE) {
            self.verbose = matches!(verbose.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        Ok(())
    }

    /// Reject destinations that can never hold output files
    pub fn validate(&self) -> Result<()> {
        let dest = &self.destination_directory;
        if dest.exists() && !dest.is_dir() {
            return Err(anyhow!(
                "Destination {} exists and is not a directory",
                dest.display()
            ));
        }
        if dest.is_dir() && !is_dir_writable(dest) {
            return Err(anyhow!("Destination {} is not writable", dest.display()));
        }
        if let Some(volumes) = &self.volumes_dir {
            if !volumes.is_dir() {
                return Err(anyhow!("Volumes directory {} not found", volumes.display()));
            }
        }
        Ok(())
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .with_context(|| format!("Invalid duration for {}: '{}'", key, value))
}

mod humantime_opt {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_str(&humantime::format_duration(*duration).to_string()),
            None => serializer.serialize_none(),
        }
    }
}

/// CLI argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use dockerbk::utils::BackupConfig;

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser)]
#[command(name = "dockerbk")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub options: RunOptions,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Back up all database containers and archive volumes (default)
    Run,

    /// Show running containers and how they would be handled
    List,

    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug, Default)]
pub struct RunOptions {
    /// Directory receiving dumps and the volumes archive
    #[arg(short, long, global = true, value_name = "DIR")]
    pub dest: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Archive this directory instead of the daemon's volume root
    #[arg(long, global = true, value_name = "DIR")]
    pub volumes_dir: Option<PathBuf>,

    /// Give up on a single dump after this long (e.g. 30m)
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    pub dump_timeout: Option<Duration>,

    /// Grace period before a stopping container is killed (e.g. 30s)
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    pub stop_timeout: Option<Duration>,

    /// Dump only the database named in the container environment
    #[arg(long, global = true)]
    pub database_only: bool,
}

impl RunOptions {
    /// Command line flags take precedence over every other source
    pub fn apply(&self, config: &mut BackupConfig) {
        if let Some(dest) = &self.dest {
            config.destination_directory = dest.clone();
        }
        if self.verbose {
            config.verbose = true;
        }
        if let Some(dir) = &self.volumes_dir {
            config.volumes_dir = Some(dir.clone());
        }
        if self.dump_timeout.is_some() {
            config.dump_timeout = self.dump_timeout;
        }
        if self.stop_timeout.is_some() {
            config.stop_timeout = self.stop_timeout;
        }
        if self.database_only {
            config.database_only = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::try_parse_from(["dockerbk"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.options.json);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "dockerbk",
            "run",
            "--dest",
            "/srv/backups",
            "--dump-timeout",
            "15m",
            "--database-only",
            "-v",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Run)));

        let mut config = BackupConfig::default();
        cli.options.apply(&mut config);
        assert_eq!(config.destination_directory, PathBuf::from("/srv/backups"));
        assert_eq!(config.dump_timeout, Some(Duration::from_secs(900)));
        assert!(config.database_only);
        assert!(config.verbose);
        // untouched values keep their defaults
        assert_eq!(config.stop_timeout, BackupConfig::default().stop_timeout);
    }

    #[test]
    fn test_rejects_bad_duration() {
        assert!(Cli::try_parse_from(["dockerbk", "--stop-timeout", "soon"]).is_err());
    }
}

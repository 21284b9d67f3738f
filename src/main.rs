mod cli;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use colored::Colorize;
use tracing::error;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use dockerbk::core::{discover, run_backup, ArchiveResult, DockerRuntime, RunReport, RunStatus};
use dockerbk::utils::{format_bytes, format_duration, BackupConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = BackupConfig::load()?;
    cli.options.apply(&mut config);
    init_logging(config.verbose);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let code = handle_run(&config, cli.options.json).await?;
            std::process::exit(code);
        }
        Commands::List => handle_list(&config).await?,
        Commands::Config => handle_config(&config)?,
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise info, or debug with `--verbose`
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn handle_run(config: &BackupConfig, json: bool) -> Result<i32> {
    config.validate()?;

    let started_at = Local::now();
    let report = match DockerRuntime::connect(config.stop_timeout).await {
        Ok(runtime) => run_backup(&runtime, config).await,
        // Nothing was touched yet, but the run still ends with a report
        Err(e) if e.is_connectivity() => {
            error!(error = %e, "cannot reach Docker");
            RunReport::aborted(started_at, &e)
        }
        Err(e) => return Err(e).context("Failed to connect to Docker"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(report.exit_code())
}

async fn handle_list(config: &BackupConfig) -> Result<()> {
    let runtime = DockerRuntime::connect(config.stop_timeout)
        .await
        .context("Failed to connect to Docker")?;
    let containers = discover(&runtime).await?;

    if containers.is_empty() {
        println!("No running containers");
        return Ok(());
    }

    println!("{:<30} {:<40} {:<15}", "Container", "Image", "Handling");
    println!("{}", "-".repeat(85));
    for container in containers {
        let handling = match container.engine() {
            Some(engine) => format!("dump ({})", engine).as_str().cyan(),
            None => "stop/start".normal(),
        };
        println!("{:<30} {:<40} {:<15}", container.name, container.image, handling);
    }

    Ok(())
}

fn handle_config(config: &BackupConfig) -> Result<()> {
    println!("{}", toml::to_string_pretty(config).context("Failed to render configuration")?);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    println!("{}", "Backup summary".bold());
    println!("{}", "-".repeat(60));

    for backup in &report.backups {
        match (&backup.output, &backup.error) {
            (Some(path), None) => println!(
                "  {} {:<24} {} ({})",
                "✓".green(),
                backup.container,
                path.display(),
                format_bytes(backup.bytes_written)
            ),
            (_, Some(error)) => println!("  {} {:<24} {}", "✗".red(), backup.container, error.message),
            (None, None) => {}
        }
    }

    match &report.archive {
        ArchiveResult::Archived { path, bytes, .. } => {
            println!("  {} {:<24} {} ({})", "✓".green(), "volumes", path.display(), format_bytes(*bytes))
        }
        ArchiveResult::Failed { error, .. } => println!("  {} {:<24} {}", "✗".red(), "volumes", error),
        ArchiveResult::NotRun => {}
    }

    for failure in &report.state_failures {
        println!(
            "  {} could not {} {}: {}",
            "!".yellow().bold(),
            failure.operation,
            failure.container,
            failure.message
        );
    }
    for failure in report.start_failures() {
        println!(
            "{}",
            format!("CRITICAL: {} is not running, start it manually", failure.container)
                .as_str()
                .red()
                .bold()
        );
    }

    if let Some(fatal) = &report.fatal_error {
        println!("{} {}", "Aborted:".red().bold(), fatal);
    }

    let label = report.status.to_string();
    let status = match report.status {
        RunStatus::Success => label.as_str().green(),
        RunStatus::PartialFailure => label.as_str().yellow(),
        RunStatus::Aborted => label.as_str().red(),
    };
    println!(
        "\n{} in {}: {} of {} database backups succeeded",
        status.bold(),
        format_duration(report.duration_secs()),
        report.successful_backups(),
        report.backups.len()
    );
}

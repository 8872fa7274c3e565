/// # ldapsync CLI
///
/// Command parsing and orchestration for the `ldapsync` binary. Each configured
/// destination gets its own [`SyncRunner`] and its own report; a destination
/// that cannot be set up is reported and skipped.
///
/// All reconciliation logic lives in `ldapsync-core`. This module only wires
/// the concrete directory, destination adapters and notifier together.
///
/// ## How To Use
/// - From a shell or cron: `ldapsync --config /etc/ldapsync.yaml [--dry-run]`.
/// - From tests: build a [`Cli`] and call [`run`].
use crate::destinations::build_destination;
use crate::directory::LdapDirectory;
use crate::load_config::load_config;
use crate::logging::LogLevel;
use crate::notify::build_notifier;
use anyhow::{bail, Result};
use clap::Parser;
use ldapsync_core::{Directory, Notifier, RunOptions, RunReport, SyncRunner};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Add LDAP group members to mailing lists, forums and other destination groups.
#[derive(Debug, Parser)]
#[clap(name = "ldapsync", version)]
pub struct Cli {
    /// Path to the YAML config file
    #[clap(long, default_value = "ldapsync.yaml")]
    pub config: PathBuf,

    /// Report intended additions without changing any destination
    #[clap(short = 'n', long)]
    pub dry_run: bool,

    /// Also append logs to this file
    #[clap(short = 'l', long)]
    pub log_file: Option<PathBuf>,

    /// Minimum level of log messages
    #[clap(long, value_enum, ignore_case = true, default_value = "WARNING")]
    pub log_level: LogLevel,

    /// Only sync the destination with this name
    #[clap(long)]
    pub destination: Option<String>,
}

/// How the run went once configuration was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every destination ran and reported without errors.
    Clean,
    /// At least one pair, add, adapter setup or notification failed.
    Failed,
}

/// Async entrypoint shared by `main` and the integration tests.
///
/// Returns `Err` only for problems that stop the run before any destination
/// is touched (unreadable config, unknown `--destination`, bad notifier).
pub async fn run(cli: Cli) -> Result<RunStatus> {
    let config = load_config(&cli.config)?;
    let timeout = Duration::from_secs(config.timeout_secs);

    let destinations: Vec<_> = match &cli.destination {
        Some(name) => {
            let selected: Vec<_> = config
                .destinations
                .iter()
                .filter(|d| &d.name == name)
                .collect();
            if selected.is_empty() {
                bail!("No destination named {name} in config");
            }
            selected
        }
        None => config.destinations.iter().collect(),
    };

    let directory: Arc<dyn Directory> = Arc::new(LdapDirectory::new(&config.directory, timeout));
    let notifier = build_notifier(&config.notification, timeout)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let options = RunOptions {
        dry_run: cli.dry_run,
        concurrency: config.concurrency,
        report_level: config.report_level,
    };
    tracing::info!(
        command = "sync",
        destinations = destinations.len(),
        dry_run = cli.dry_run,
        "Starting synchronisation process"
    );

    let mut status = RunStatus::Clean;
    for section in destinations {
        if cancel.is_cancelled() {
            tracing::warn!(destination = %section.name, "Run cancelled, skipping destination");
            status = RunStatus::Failed;
            continue;
        }

        let destination = match build_destination(section, timeout) {
            Ok(destination) => destination,
            Err(e) => {
                tracing::error!(destination = %section.name, error = %e, "Destination setup failed");
                report_setup_failure(notifier.as_ref(), &section.name, &e, &options).await;
                status = RunStatus::Failed;
                continue;
            }
        };

        let runner = SyncRunner::new(
            directory.clone(),
            destination,
            notifier.clone(),
            section.pair_config(),
            options.clone(),
        );
        match runner.run(&cancel).await {
            Ok(report) => {
                if !report.text.is_empty() {
                    println!("{}", report.text);
                }
                if report.has_errors() {
                    tracing::warn!(destination = %section.name, "Synchronisation finished with errors");
                    status = RunStatus::Failed;
                } else {
                    tracing::info!(destination = %section.name, "Synchronisation complete");
                }
            }
            Err(e) => {
                tracing::error!(destination = %section.name, error = %e, "Synchronisation report could not be sent");
                status = RunStatus::Failed;
            }
        }
    }

    Ok(status)
}

async fn report_setup_failure(
    notifier: &dyn Notifier,
    destination: &str,
    error: &anyhow::Error,
    options: &RunOptions,
) {
    let report = RunReport::new();
    report.error(format!("Failed to set up destination {destination}: {error:#}"));
    let text = report.render(options.report_level);
    println!("{text}");
    if let Err(e) = notifier.send_report(&text).await {
        tracing::error!(destination, error = %e, "Failed to send setup failure report");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["ldapsync"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("ldapsync.yaml"));
        assert!(!cli.dry_run);
        assert_eq!(cli.log_level, LogLevel::Warning);
        assert!(cli.log_file.is_none());
    }

    #[test]
    fn short_flags_and_level() {
        let cli = Cli::try_parse_from([
            "ldapsync", "-n", "-l", "/tmp/sync.log", "--log-level", "debug",
        ])
        .unwrap();
        assert!(cli.dry_run);
        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/sync.log")));
        assert_eq!(cli.log_level, LogLevel::Debug);
    }

    #[test]
    fn unknown_level_is_rejected() {
        assert!(Cli::try_parse_from(["ldapsync", "--log-level", "TRACE"]).is_err());
    }
}

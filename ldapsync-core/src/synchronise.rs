//! High-level run: reconciles every configured pair of one destination and
//! flushes the run report.
//!
//! [`SyncRunner`] is composed from the collaborators it needs instead of being
//! specialised per destination: a [`Directory`], one [`DestinationService`],
//! a [`Notifier`] and the destination's [`SyncPairConfig`].
//!
//! # Responsibilities
//! - For each pair: fetch source members, fetch destination members, compute
//!   the [`Diff`](crate::reconcile::Diff), apply it (dry-run aware).
//! - Catch every failure at the pair boundary: the pair gets an Error line and
//!   the run moves on to the next pair.
//! - Flush the report exactly once after all pairs, whatever happened.
//!
//! # Concurrency
//! Pairs run sequentially unless [`RunOptions::concurrency`] is raised, in which
//! case up to that many pairs are in flight. The [`RunReport`] is the only state
//! they share.
//!
//! # Cancellation
//! Every collaborator call races the run's [`CancellationToken`]. A cancelled
//! run marks the pairs it could not finish as cancelled, then still flushes
//! the report so operators see how far it got.

use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{SyncPair, SyncPairConfig};
use crate::contract::{DestinationService, Directory, Notifier};
use crate::error::{DestinationError, NotificationError, PairError};
use crate::reconcile::{apply, diff};
use crate::report::{Level, RunReport};

/// Per-run switches.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Report intended additions without calling the destination.
    pub dry_run: bool,
    /// Maximum number of pairs processed at once. Values below 1 mean 1.
    pub concurrency: usize,
    /// Lowest level included in the notification sent at the end of the run.
    pub report_level: Level,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            concurrency: 1,
            report_level: Level::Warning,
        }
    }
}

/// Outcome of one runner invocation.
#[derive(Debug)]
pub struct SynchroniseReport {
    pub destination: String,
    pub dry_run: bool,
    /// One entry per configured pair, in configuration order.
    pub pairs: Vec<PairReport>,
    /// Every report line rendered, regardless of the notification level.
    pub text: String,
}

impl SynchroniseReport {
    /// True when any pair failed outright or any single add failed.
    pub fn has_errors(&self) -> bool {
        self.pairs
            .iter()
            .any(|p| p.error.is_some() || !p.failed.is_empty())
    }

    pub fn failed_pairs(&self) -> impl Iterator<Item = &PairReport> {
        self.pairs.iter().filter(|p| p.error.is_some())
    }
}

#[derive(Debug)]
pub struct PairReport {
    pub pair: SyncPair,
    pub added: Vec<String>,
    pub failed: Vec<(String, DestinationError)>,
    pub drift: Vec<String>,
    /// Set when the pair could not be reconciled at all.
    pub error: Option<PairError>,
}

impl PairReport {
    fn failed(pair: SyncPair, error: PairError) -> Self {
        Self {
            pair,
            added: Vec::new(),
            failed: Vec::new(),
            drift: Vec::new(),
            error: Some(error),
        }
    }
}

/// Reconciles all pairs of one destination.
pub struct SyncRunner {
    directory: Arc<dyn Directory>,
    destination: Arc<dyn DestinationService>,
    notifier: Arc<dyn Notifier>,
    config: SyncPairConfig,
    options: RunOptions,
}

impl SyncRunner {
    pub fn new(
        directory: Arc<dyn Directory>,
        destination: Arc<dyn DestinationService>,
        notifier: Arc<dyn Notifier>,
        config: SyncPairConfig,
        options: RunOptions,
    ) -> Self {
        Self {
            directory,
            destination,
            notifier,
            config,
            options,
        }
    }

    /// Process every pair, then send the report once.
    ///
    /// Pair failures never make this return an error; only a failed
    /// notification does, and only after all pairs were processed.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SynchroniseReport, NotificationError> {
        let report = RunReport::new();
        info!(
            destination = %self.config.destination,
            pairs = self.config.pairs.len(),
            dry_run = self.options.dry_run,
            "[SYNC] Starting synchronisation run"
        );

        let shared = &report;
        let mut pairs: Vec<(usize, PairReport)> =
            stream::iter(self.config.pairs.iter().enumerate())
                .map(move |(idx, pair)| async move {
                    (idx, self.sync_pair(pair, shared, cancel).await)
                })
                .buffer_unordered(self.options.concurrency.max(1))
                .collect()
                .await;
        pairs.sort_by_key(|(idx, _)| *idx);
        let pairs: Vec<PairReport> = pairs.into_iter().map(|(_, p)| p).collect();

        let failed = pairs.iter().filter(|p| p.error.is_some()).count();
        info!(
            destination = %self.config.destination,
            pairs = pairs.len(),
            failed,
            "[SYNC] All pairs processed, flushing report"
        );

        // Not raced against `cancel`: a cancelled run still reports.
        let text = report.render(self.options.report_level);
        if let Err(e) = self.notifier.send_report(&text).await {
            error!(
                destination = %self.config.destination,
                error = %e,
                "[SYNC][ERROR] Failed to send run report"
            );
            return Err(e);
        }
        info!(destination = %self.config.destination, "[SYNC] Run report sent");

        Ok(SynchroniseReport {
            destination: self.config.destination.clone(),
            dry_run: self.options.dry_run,
            pairs,
            text: report.render(Level::Info),
        })
    }

    async fn sync_pair(
        &self,
        pair: &SyncPair,
        report: &RunReport,
        cancel: &CancellationToken,
    ) -> PairReport {
        info!(pair = %pair, "[SYNC] Reconciling pair");
        match self.try_sync_pair(pair, report, cancel).await {
            Ok(pair_report) => {
                match &pair_report.error {
                    Some(e) => {
                        warn!(
                            pair = %pair,
                            added = pair_report.added.len(),
                            "[SYNC] Pair interrupted"
                        );
                        report.error(format!("Failed to sync {pair} ({}): {e}", e.kind()));
                    }
                    None => info!(
                        pair = %pair,
                        added = pair_report.added.len(),
                        failed = pair_report.failed.len(),
                        drift = pair_report.drift.len(),
                        "[SYNC] Pair reconciled"
                    ),
                }
                pair_report
            }
            Err(e) => {
                report.error(format!("Failed to sync {pair} ({}): {e}", e.kind()));
                PairReport::failed(pair.clone(), e)
            }
        }
    }

    async fn try_sync_pair(
        &self,
        pair: &SyncPair,
        report: &RunReport,
        cancel: &CancellationToken,
    ) -> Result<PairReport, PairError> {
        if cancel.is_cancelled() {
            return Err(PairError::Cancelled);
        }
        let source = guarded(cancel, self.directory.list_group_members(&pair.source)).await?;
        let current = guarded(cancel, self.destination.list_members(&pair.destination)).await?;

        let d = diff(&source, &current);
        if d.is_empty() {
            info!(pair = %pair, members = source.len(), "[SYNC] Pair already in sync");
        }

        let outcome = apply(
            &d,
            self.destination.as_ref(),
            pair,
            self.options.dry_run,
            report,
            cancel,
        )
        .await;

        if !outcome.failed.is_empty() {
            warn!(
                pair = %pair,
                failed = outcome.failed.len(),
                "[SYNC] Some members could not be added"
            );
        }

        Ok(PairReport {
            pair: pair.clone(),
            added: outcome.added,
            failed: outcome.failed,
            drift: d.extra.into_iter().collect(),
            error: outcome.cancelled.then_some(PairError::Cancelled),
        })
    }
}

/// Await `fut` unless the run is cancelled first.
async fn guarded<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, PairError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<PairError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PairError::Cancelled),
        result = fut => result.map_err(Into::into),
    }
}

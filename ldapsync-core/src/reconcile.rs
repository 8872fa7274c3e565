//! Reconciliation engine: the pure membership diff and the one side-effecting
//! apply step for a single sync pair.
//!
//! - [`diff`] computes who is missing from the destination and who is there
//!   without being in the directory group.
//! - [`apply`] adds the missing members (or only reports them in a dry run)
//!   and reports drift. Members present only at the destination are never
//!   touched.
//!
//! Each add is independent: a failing add is recorded and the remaining
//! members are still attempted. There is no retry within a run; the next
//! scheduled run recomputes the diff from scratch.
//!
//! Cancellation is checked between adds, so members added before the run was
//! cancelled stay in the outcome.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SyncPair;
use crate::contract::{DestinationService, MemberSet};
use crate::error::DestinationError;
use crate::report::RunReport;

/// Membership difference for one pair. Derived each run, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// In the directory group, missing from the destination.
    pub to_add: MemberSet,
    /// At the destination, not in the directory group (drift).
    pub extra: MemberSet,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.extra.is_empty()
    }
}

/// `to_add = source \ destination`, `extra = destination \ source`.
pub fn diff(source: &MemberSet, destination: &MemberSet) -> Diff {
    Diff {
        to_add: source.difference(destination).cloned().collect(),
        extra: destination.difference(source).cloned().collect(),
    }
}

/// Per-identifier result of [`apply`].
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Added members, or in a dry run the members that would have been added.
    pub added: Vec<String>,
    pub failed: Vec<(String, DestinationError)>,
    /// Set when the run was cancelled before every member was attempted.
    pub cancelled: bool,
}

/// Report drift and add every member of `diff.to_add` to the destination group.
///
/// With `dry_run` set the destination is never called; each intended add is
/// reported as an Info line instead.
pub async fn apply<D>(
    diff: &Diff,
    destination: &D,
    pair: &SyncPair,
    dry_run: bool,
    report: &RunReport,
    cancel: &CancellationToken,
) -> ApplyOutcome
where
    D: DestinationService + ?Sized,
{
    for member in &diff.extra {
        report.warning(format!(
            "{member} is in {} but not in LDAP group {}",
            pair.destination, pair.source
        ));
    }

    let mut outcome = ApplyOutcome::default();
    for member in &diff.to_add {
        if dry_run {
            report.info(format!("Would add {member} to {}", pair.destination));
            outcome.added.push(member.clone());
            continue;
        }

        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }

        debug!(member = %member, pair = %pair, "Adding member");
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = destination.add_member(member, &pair.destination) => Some(result),
        };
        let Some(result) = result else {
            outcome.cancelled = true;
            break;
        };
        match result {
            Ok(()) => {
                report.info(format!("Added {member} to {}", pair.destination));
                outcome.added.push(member.clone());
            }
            Err(e) => {
                report.error(format!(
                    "Failed to add {member} to {} ({}): {e}",
                    pair.destination,
                    e.kind()
                ));
                outcome.failed.push((member.clone(), e));
            }
        }
    }

    outcome
}

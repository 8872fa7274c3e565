//! # contract: capability interfaces consumed by the reconciliation engine
//!
//! This module defines the three seams the engine talks through:
//!
//! - [`Directory`]: the authoritative source of group membership (e.g. LDAP).
//! - [`DestinationService`]: one external group-membership service (a mailing
//!   list provider, a forum, a ticketing system).
//! - [`Notifier`]: the operator channel that receives the run report.
//!
//! ## Interface & Extensibility
//! - Implement [`DestinationService`] once per destination. All protocol detail
//!   (auth, pagination, identifier encoding) stays behind the trait so the
//!   reconciliation algorithm never sees it.
//! - All methods are async and return typed errors from [`crate::error`].
//!
//! ## Mocking & Testing
//! - The traits are annotated for `mockall`; with the `test-export-mocks`
//!   feature the generated `Mock*` types are available to dependent crates.

use std::collections::BTreeSet;

use async_trait::async_trait;
use mockall::automock;

use crate::error::{DestinationError, DirectoryError, NotificationError};

/// Member identifiers of one group as seen by one side at one point in time.
///
/// Identifiers are case-sensitive bare directory usernames. The ordered set
/// keeps report output stable across runs with identical membership.
pub type MemberSet = BTreeSet<String>;

/// Read access to the authoritative directory.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    /// Current members of the named directory group.
    async fn list_group_members(&self, group: &str) -> Result<MemberSet, DirectoryError>;
}

/// One external group-membership service.
///
/// Implementors must return bare directory identifiers from `list_members`:
/// strip transport qualifiers such as an email domain, and leave out the sync
/// bot's own identity and anything outside the directory's namespace.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DestinationService: Send + Sync {
    /// Current members of the destination group.
    async fn list_members(&self, destination_group: &str) -> Result<MemberSet, DestinationError>;

    /// Ensure `identifier` is a member of the destination group.
    ///
    /// Must succeed when the member is already present.
    async fn add_member(
        &self,
        identifier: &str,
        destination_group: &str,
    ) -> Result<(), DestinationError>;
}

/// Delivers the end-of-run report to operators.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_report(&self, text: &str) -> Result<(), NotificationError>;
}

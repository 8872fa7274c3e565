//! # Destination adapters
//!
//! Concrete [`DestinationService`] implementations, one per external service,
//! and [`build_destination`], which picks one from the `type` tag of a
//! configured destination.
//!
//! ## Adding a destination
//! 1. Add a module implementing [`DestinationService`]. `list_members` must
//!    return bare directory usernames and leave out the bot account.
//! 2. Add a variant to [`DestinationKind`] and a match arm below.

pub mod discourse;
pub mod google_groups;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ldapsync_core::{DestinationError, DestinationService};
use reqwest::StatusCode;

use crate::load_config::{DestinationKind, DestinationSection};

pub use discourse::Discourse;
pub use google_groups::GoogleGroups;

/// Build the adapter for one configured destination, reading its secrets from env.
pub fn build_destination(
    section: &DestinationSection,
    timeout: Duration,
) -> Result<Arc<dyn DestinationService>> {
    let http = http_client(timeout)?;
    let destination: Arc<dyn DestinationService> = match &section.kind {
        DestinationKind::GoogleGroups {
            domain,
            bot_user,
            base_url,
        } => Arc::new(
            GoogleGroups::new_from_env(
                http,
                base_url.as_deref().unwrap_or(google_groups::DEFAULT_BASE_URL),
                domain,
                bot_user.clone(),
            )
            .with_context(|| format!("Failed to set up Google Groups destination {}", section.name))?,
        ),
        DestinationKind::Discourse { base_url, bot_user } => Arc::new(
            Discourse::new_from_env(http, base_url, bot_user.clone())
                .with_context(|| format!("Failed to set up Discourse destination {}", section.name))?,
        ),
    };
    tracing::info!(destination = %section.name, "Destination client constructed");
    Ok(destination)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("ldapsync/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// Which operation a non-success status was returned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    List,
    Add,
}

/// Map a non-success HTTP status to the destination error taxonomy.
///
/// Auth failures while listing count as the upstream being unusable; while
/// adding they mean the sync identity lacks rights on that group.
pub(crate) fn status_error(
    status: StatusCode,
    call: Call,
    group: &str,
    body: &str,
) -> DestinationError {
    match status {
        StatusCode::NOT_FOUND => DestinationError::not_found(group),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN if call == Call::Add => {
            DestinationError::permission_denied(format!("HTTP {status} for {group}: {body}"))
        }
        _ => DestinationError::upstream(format!("HTTP {status} for {group}: {body}")),
    }
}

pub(crate) fn transport_error(group: &str, e: reqwest::Error) -> DestinationError {
    DestinationError::upstream(format!("request for {group} failed: {e}"))
}

//! Error taxonomy for the reconciliation engine.
//!
//! Each collaborator has its own error type so the runner can decide how far a
//! failure propagates:
//! - [`DirectoryError`] and destination fetch errors abort the current pair only.
//! - [`DestinationError`] raised by an add aborts the current member only.
//! - [`NotificationError`] is returned from the run after every pair was processed.

use thiserror::Error;

/// Failure while reading the authoritative directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory could not be reached or the query failed.
    #[error("directory unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The named directory group does not exist.
    #[error("directory group not found: {group}")]
    GroupNotFound { group: String },
}

impl DirectoryError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Failure reported by a destination service adapter.
#[derive(Debug, Error)]
pub enum DestinationError {
    /// Transport, authentication or server-side failure.
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    /// The destination group does not exist.
    #[error("destination group not found: {group}")]
    NotFound { group: String },

    /// The sync identity may not modify the destination group.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },
}

impl DestinationError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
        }
    }

    pub fn not_found(group: impl Into<String>) -> Self {
        Self::NotFound {
            group: group.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Short, stable name of the error kind for report lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpstreamUnavailable { .. } => "UpstreamUnavailable",
            Self::NotFound { .. } => "NotFound",
            Self::PermissionDenied { .. } => "PermissionDenied",
        }
    }
}

/// The operator notification could not be delivered.
#[derive(Debug, Error)]
#[error("notification failed: {message}")]
pub struct NotificationError {
    pub message: String,
}

impl NotificationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Everything that can end the processing of a single sync pair.
#[derive(Debug, Error)]
pub enum PairError {
    #[error("{0}")]
    Directory(#[from] DirectoryError),

    #[error("{0}")]
    Destination(#[from] DestinationError),

    #[error("run cancelled")]
    Cancelled,
}

impl PairError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Directory(DirectoryError::Unavailable { .. }) => "DirectoryUnavailable",
            Self::Directory(DirectoryError::GroupNotFound { .. }) => "DirectoryGroupNotFound",
            Self::Destination(e) => e.kind(),
            Self::Cancelled => "Cancelled",
        }
    }
}

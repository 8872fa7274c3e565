use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A declared reconciliation target: which directory group feeds which
/// destination group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncPair {
    /// Name of the directory group (the source of truth).
    pub source: String,
    /// Destination-specific group identifier (list address, forum group name).
    pub destination: String,
}

impl SyncPair {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

impl fmt::Display for SyncPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

/// Static pair list for one destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPairConfig {
    /// Label of the destination these pairs belong to.
    pub destination: String,
    #[serde(default)]
    pub pairs: Vec<SyncPair>,
}

impl SyncPairConfig {
    pub fn trace_loaded(&self) {
        info!(
            destination = %self.destination,
            pairs_count = self.pairs.len(),
            "Loaded sync pairs"
        );
        debug!(?self, "Sync pairs loaded (full debug)");
    }
}

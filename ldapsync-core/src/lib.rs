#![doc = "ldapsync-core: reconciliation engine for one-way directory group sync."]

//! This crate holds the destination-agnostic part of ldapsync: the capability
//! traits every directory, destination and notifier implements, the membership
//! diff, the dry-run aware apply step, the run report and the per-destination
//! runner. Concrete LDAP, HTTP and notification clients live in the `ldapsync`
//! binary crate.

pub mod config;
pub mod contract;
pub mod error;
pub mod reconcile;
pub mod report;
pub mod synchronise;

pub use config::{SyncPair, SyncPairConfig};
pub use contract::{DestinationService, Directory, MemberSet, Notifier};
pub use error::{DestinationError, DirectoryError, NotificationError, PairError};
pub use report::{Level, RunReport};
pub use synchronise::{RunOptions, SyncRunner, SynchroniseReport};

/// `load_config` module: loads the static YAML config file and injects the
/// optional LDAP bind secrets from the environment.
///
/// This module is the only place where the YAML is parsed and mapped to
/// strongly-typed structs. Destination credentials are read from the
/// environment when the destination client is built (see
/// [`crate::destinations`]), so a run that skips a destination does not need
/// its secrets.
///
/// # Errors
/// All errors use `anyhow::Error` with context and are surfaced at the CLI
/// boundary.
use anyhow::{bail, Result};
use ldapsync_core::{Level, SyncPair, SyncPairConfig};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub directory: DirectorySection,
    pub notification: NotificationSection,
    /// Lowest level included in the notification sent after each run.
    #[serde(default = "default_report_level")]
    pub report_level: Level,
    /// Pairs reconciled at once within one destination.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Timeout for every directory, destination and webhook call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub destinations: Vec<DestinationSection>,
}

#[derive(Debug, Deserialize)]
pub struct DirectorySection {
    pub url: String,
    pub base_dn: String,
    /// Filled from `LDAP_BIND_DN` / `LDAP_BIND_PASSWORD`; anonymous bind otherwise.
    #[serde(skip)]
    pub bind: Option<LdapBind>,
}

#[derive(Debug, Clone)]
pub struct LdapBind {
    pub dn: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationSection {
    /// POST the report as JSON.
    Webhook {
        url: String,
        #[serde(default = "default_subject")]
        subject: String,
    },
    /// Pipe the report into a program's stdin, e.g. `mail -s ... root`.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct DestinationSection {
    /// Label used in logs, the report and `--destination`.
    pub name: String,
    #[serde(flatten)]
    pub kind: DestinationKind,
    #[serde(default)]
    pub pairs: Vec<SyncPair>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DestinationKind {
    GoogleGroups {
        /// Only members of this email domain are directory identities.
        domain: String,
        #[serde(default)]
        bot_user: Option<String>,
        #[serde(default)]
        base_url: Option<String>,
    },
    Discourse {
        base_url: String,
        #[serde(default)]
        bot_user: Option<String>,
    },
}

impl DestinationSection {
    pub fn pair_config(&self) -> SyncPairConfig {
        SyncPairConfig {
            destination: self.name.clone(),
            pairs: self.pairs.clone(),
        }
    }
}

fn default_report_level() -> Level {
    Level::Warning
}

fn default_concurrency() -> usize {
    1
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_subject() -> String {
    "ldapsync report".to_string()
}

/// Loads a static YAML config file and injects LDAP bind credentials from env.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: AppConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    validate(&config)?;

    config.directory.bind = match (
        std::env::var("LDAP_BIND_DN"),
        std::env::var("LDAP_BIND_PASSWORD"),
    ) {
        (Ok(dn), Ok(password)) => {
            info!(bind_dn = %dn, "LDAP bind credentials found in env");
            Some(LdapBind { dn, password })
        }
        (Ok(dn), Err(_)) => {
            error!(bind_dn = %dn, "LDAP_BIND_DN set without LDAP_BIND_PASSWORD");
            bail!("LDAP_BIND_DN is set but LDAP_BIND_PASSWORD is not");
        }
        _ => {
            info!("No LDAP bind credentials in env, using anonymous bind");
            None
        }
    };

    for destination in &config.destinations {
        destination.pair_config().trace_loaded();
    }
    info!(
        destinations = config.destinations.len(),
        directory = %config.directory.url,
        "Config loaded and merged successfully"
    );

    Ok(config)
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.destinations.is_empty() {
        warn!("No destinations configured, nothing to sync");
    }

    let mut names = HashSet::new();
    for destination in &config.destinations {
        if !names.insert(destination.name.as_str()) {
            bail!("Duplicate destination name in config: {}", destination.name);
        }
        for pair in &destination.pairs {
            if pair.source.trim().is_empty() || pair.destination.trim().is_empty() {
                bail!(
                    "Destination {} has a pair with an empty group name: {}",
                    destination.name,
                    pair
                );
            }
        }
    }

    if config.concurrency == 0 {
        bail!("concurrency must be at least 1");
    }
    Ok(())
}

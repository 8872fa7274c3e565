//! LDAP directory: the authoritative source of group membership.
//!
//! Groups are `posixGroup` entries found by `cn` under the configured base DN;
//! members are the `memberUid` values. A fresh connection is opened for every
//! lookup so a dropped connection never outlives one pair.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use ldapsync_core::{Directory, DirectoryError, MemberSet};
use tracing::{debug, info, warn};

use crate::load_config::{DirectorySection, LdapBind};

const MEMBER_ATTR: &str = "memberUid";

pub struct LdapDirectory {
    url: String,
    base_dn: String,
    bind: Option<LdapBind>,
    timeout: Duration,
}

impl LdapDirectory {
    pub fn new(section: &DirectorySection, timeout: Duration) -> Self {
        Self {
            url: section.url.clone(),
            base_dn: section.base_dn.clone(),
            bind: section.bind.clone(),
            timeout,
        }
    }

    async fn connect(&self) -> Result<Ldap, DirectoryError> {
        debug!(url = %self.url, "Connecting to LDAP server");
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.url)
            .await
            .map_err(|e| {
                DirectoryError::unavailable_with_source(
                    format!("failed to connect to {}", self.url),
                    e,
                )
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        ldap.with_timeout(self.timeout);
        if let Some(bind) = &self.bind {
            debug!(bind_dn = %bind.dn, "Performing LDAP bind");
            ldap.simple_bind(&bind.dn, &bind.password)
                .await
                .and_then(|res| res.success())
                .map_err(|e| {
                    DirectoryError::unavailable_with_source(
                        format!("bind as {} failed", bind.dn),
                        e,
                    )
                })?;
        }
        Ok(ldap)
    }
}

/// Search filter for a posix group by common name, with the name escaped.
pub fn group_filter(group: &str) -> String {
    format!("(&(objectClass=posixGroup)(cn={}))", ldap_escape(group))
}

#[async_trait]
impl Directory for LdapDirectory {
    async fn list_group_members(&self, group: &str) -> Result<MemberSet, DirectoryError> {
        let mut ldap = self.connect().await?;

        let result = ldap
            .search(
                &self.base_dn,
                Scope::Subtree,
                &group_filter(group),
                vec![MEMBER_ATTR],
            )
            .await
            .and_then(|res| res.success());

        if let Err(e) = ldap.unbind().await {
            warn!(error = %e, "Error during LDAP unbind");
        }

        let (entries, _res) = result.map_err(|e| {
            DirectoryError::unavailable_with_source(format!("search for group {group} failed"), e)
        })?;

        if entries.is_empty() {
            return Err(DirectoryError::GroupNotFound {
                group: group.to_string(),
            });
        }

        let members: MemberSet = entries
            .into_iter()
            .map(SearchEntry::construct)
            .flat_map(|entry| entry.attrs.get(MEMBER_ATTR).cloned().unwrap_or_default())
            .collect();

        info!(group, count = members.len(), "Fetched LDAP group members");
        Ok(members)
    }
}

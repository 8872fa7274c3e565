//! Google Groups (mailing lists) through the Admin SDK Directory API.
//!
//! - List: `GET /admin/directory/v1/groups/{groupKey}/members`, paginated with
//!   `pageToken`.
//! - Add: `POST` to the same path with `{"email", "role": "MEMBER"}`. The API
//!   answers 409 when the member already exists, which counts as success.
//!
//! Directory identities are the local parts of addresses in the configured
//! domain. Addresses in other domains, and the sync bot's own address, are
//! left out of the member set.
//!
//! Authentication is a bearer access token from `GOOGLE_ACCESS_TOKEN`, minted
//! outside this process for a service account with domain-wide delegation.

use async_trait::async_trait;
use ldapsync_core::{DestinationError, DestinationService, MemberSet};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, error, info};

use super::{status_error, transport_error, Call};

pub const DEFAULT_BASE_URL: &str = "https://admin.googleapis.com";

const PAGE_SIZE: &str = "200";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembersPage {
    #[serde(default)]
    members: Vec<Member>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Member {
    // Absent for CUSTOMER-type members.
    email: Option<String>,
    /// USER, GROUP or CUSTOMER.
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl Member {
    /// Address of a person; nested groups and customers have none.
    fn user_email(&self) -> Option<&str> {
        match self.kind.as_deref() {
            None | Some("USER") => self.email.as_deref(),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct NewMember<'a> {
    email: &'a str,
    role: &'a str,
}

pub struct GoogleGroups {
    http: Client,
    base_url: Url,
    token: String,
    domain: String,
    bot_user: Option<String>,
}

impl GoogleGroups {
    pub fn new(
        http: Client,
        base_url: &str,
        token: String,
        domain: &str,
        bot_user: Option<String>,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid Google API base URL {base_url}: {e}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Google API base URL cannot be a base: {base_url}");
        }
        Ok(Self {
            http,
            base_url,
            token,
            domain: domain.to_string(),
            bot_user,
        })
    }

    pub fn new_from_env(
        http: Client,
        base_url: &str,
        domain: &str,
        bot_user: Option<String>,
    ) -> anyhow::Result<Self> {
        match env::var("GOOGLE_ACCESS_TOKEN") {
            Ok(token) => {
                info!(
                    token_set = !token.is_empty(),
                    domain,
                    "Initialized Google Groups client from environment"
                );
                Self::new(http, base_url, token, domain, bot_user)
            }
            Err(e) => {
                error!(error = ?e, "GOOGLE_ACCESS_TOKEN missing in environment");
                Err(anyhow::anyhow!(
                    "GOOGLE_ACCESS_TOKEN environment variable not set: {e}"
                ))
            }
        }
    }

    fn members_url(&self, group: &str) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`: the base URL can carry path segments.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["admin", "directory", "v1", "groups", group, "members"]);
        }
        url
    }

    /// Bare username for an address in the configured domain, unless it is the bot.
    fn username_for<'a>(&self, email: &'a str) -> Option<&'a str> {
        let (local, domain) = email.rsplit_once('@')?;
        if !domain.eq_ignore_ascii_case(&self.domain) {
            return None;
        }
        if self.bot_user.as_deref() == Some(local) {
            return None;
        }
        Some(local)
    }
}

#[async_trait]
impl DestinationService for GoogleGroups {
    async fn list_members(&self, destination_group: &str) -> Result<MemberSet, DestinationError> {
        let url = self.members_url(destination_group);
        let mut members = MemberSet::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(url.clone())
                .bearer_auth(&self.token)
                .query(&[("maxResults", PAGE_SIZE)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| transport_error(destination_group, e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                error!(group = destination_group, %status, "Failed to list Google Group members");
                return Err(status_error(status, Call::List, destination_group, &body));
            }

            let page: MembersPage = response
                .json()
                .await
                .map_err(|e| transport_error(destination_group, e))?;
            for member in &page.members {
                let Some(email) = member.user_email() else {
                    debug!(group = destination_group, member = ?member, "Skipping non-user member");
                    continue;
                };
                match self.username_for(email) {
                    Some(username) => {
                        members.insert(username.to_string());
                    }
                    None => debug!(group = destination_group, email, "Skipping non-directory member"),
                }
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        info!(
            group = destination_group,
            count = members.len(),
            "Fetched Google Group members"
        );
        Ok(members)
    }

    async fn add_member(
        &self,
        identifier: &str,
        destination_group: &str,
    ) -> Result<(), DestinationError> {
        let email = format!("{identifier}@{}", self.domain);
        info!(group = destination_group, email = %email, "Adding member to Google Group");

        let response = self
            .http
            .post(self.members_url(destination_group))
            .bearer_auth(&self.token)
            .json(&NewMember {
                email: &email,
                role: "MEMBER",
            })
            .send()
            .await
            .map_err(|e| transport_error(destination_group, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::CONFLICT {
            debug!(group = destination_group, email = %email, "Member already exists");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        error!(group = destination_group, email = %email, %status, "Failed to add Google Group member");
        Err(status_error(status, Call::Add, destination_group, &body))
    }
}

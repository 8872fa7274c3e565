//! Discourse forum groups.
//!
//! Discourse usernames are the directory usernames, so no identifier mapping
//! is needed beyond leaving out `system` and the sync bot.
//!
//! Adding a member needs the numeric group id; ids are looked up once per
//! group name and cached for the lifetime of the client.

use std::collections::HashMap;
use std::env;
use std::sync::Mutex;

use async_trait::async_trait;
use ldapsync_core::{DestinationError, DestinationService, MemberSet};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};

use super::{status_error, transport_error, Call};

const PAGE_SIZE: u64 = 50;
const SYSTEM_USER: &str = "system";

#[derive(Debug, Deserialize)]
struct MembersPage {
    #[serde(default)]
    members: Vec<ForumUser>,
    meta: PageMeta,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct ForumUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct GroupEnvelope {
    group: GroupInfo,
}

#[derive(Debug, Deserialize)]
struct GroupInfo {
    id: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

pub struct Discourse {
    http: Client,
    base_url: Url,
    api_key: String,
    api_username: String,
    bot_user: Option<String>,
    group_ids: Mutex<HashMap<String, u64>>,
}

impl Discourse {
    pub fn new(
        http: Client,
        base_url: &str,
        api_key: String,
        api_username: String,
        bot_user: Option<String>,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid Discourse base URL {base_url}: {e}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Discourse base URL cannot be a base: {base_url}");
        }
        Ok(Self {
            http,
            base_url,
            api_key,
            api_username,
            bot_user,
            group_ids: Mutex::new(HashMap::new()),
        })
    }

    pub fn new_from_env(
        http: Client,
        base_url: &str,
        bot_user: Option<String>,
    ) -> anyhow::Result<Self> {
        match (env::var("DISCOURSE_API_KEY"), env::var("DISCOURSE_API_USERNAME")) {
            (Ok(api_key), Ok(api_username)) => {
                info!(
                    base_url,
                    api_username = %api_username,
                    "Initialized Discourse client from environment"
                );
                Self::new(http, base_url, api_key, api_username, bot_user)
            }
            (Err(e), _) => {
                error!(error = ?e, "DISCOURSE_API_KEY missing in environment");
                Err(anyhow::anyhow!("DISCOURSE_API_KEY environment variable not set: {e}"))
            }
            (_, Err(e)) => {
                error!(error = ?e, "DISCOURSE_API_USERNAME missing in environment");
                Err(anyhow::anyhow!(
                    "DISCOURSE_API_USERNAME environment variable not set: {e}"
                ))
            }
        }
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Api-Key", &self.api_key)
            .header("Api-Username", &self.api_username)
    }

    fn is_directory_user(&self, username: &str) -> bool {
        username != SYSTEM_USER && self.bot_user.as_deref() != Some(username)
    }

    async fn group_id(&self, group: &str) -> Result<u64, DestinationError> {
        if let Some(id) = self.cached_id(group) {
            return Ok(id);
        }

        let response = self
            .authed(self.http.get(self.url(&["groups", &format!("{group}.json")])))
            .send()
            .await
            .map_err(|e| transport_error(group, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, Call::Add, group, &body));
        }
        let envelope: GroupEnvelope = response
            .json()
            .await
            .map_err(|e| transport_error(group, e))?;

        self.group_ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(group.to_string(), envelope.group.id);
        Ok(envelope.group.id)
    }

    fn cached_id(&self, group: &str) -> Option<u64> {
        self.group_ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(group)
            .copied()
    }
}

#[async_trait]
impl DestinationService for Discourse {
    async fn list_members(&self, destination_group: &str) -> Result<MemberSet, DestinationError> {
        let url = self.url(&["groups", destination_group, "members.json"]);
        let mut members = MemberSet::new();
        let mut offset = 0u64;

        loop {
            let response = self
                .authed(self.http.get(url.clone()))
                .query(&[("limit", PAGE_SIZE), ("offset", offset)])
                .send()
                .await
                .map_err(|e| transport_error(destination_group, e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                error!(group = destination_group, %status, "Failed to list Discourse group members");
                return Err(status_error(status, Call::List, destination_group, &body));
            }

            let page: MembersPage = response
                .json()
                .await
                .map_err(|e| transport_error(destination_group, e))?;
            let fetched = page.members.len() as u64;
            for user in page.members {
                if self.is_directory_user(&user.username) {
                    members.insert(user.username);
                } else {
                    debug!(group = destination_group, username = %user.username, "Skipping bot account");
                }
            }

            offset += fetched;
            if fetched == 0 || offset >= page.meta.total {
                break;
            }
        }

        info!(
            group = destination_group,
            count = members.len(),
            "Fetched Discourse group members"
        );
        Ok(members)
    }

    async fn add_member(
        &self,
        identifier: &str,
        destination_group: &str,
    ) -> Result<(), DestinationError> {
        let id = self.group_id(destination_group).await?;
        info!(group = destination_group, group_id = id, username = identifier, "Adding member to Discourse group");

        let response = self
            .authed(self.http.put(self.url(&["groups", &id.to_string(), "members.json"])))
            .json(&json!({ "usernames": identifier }))
            .send()
            .await
            .map_err(|e| transport_error(destination_group, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
            if parsed.errors.iter().any(|e| e.contains("already")) {
                debug!(group = destination_group, username = identifier, "Member already in group");
                return Ok(());
            }
        }
        error!(group = destination_group, username = identifier, %status, "Failed to add Discourse group member");
        Err(status_error(status, Call::Add, destination_group, &body))
    }
}

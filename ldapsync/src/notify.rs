//! Report delivery.
//!
//! The run report is flushed once per destination run through one of:
//! - [`WebhookNotifier`]: POSTs `{"subject", "text"}` as JSON.
//! - [`CommandNotifier`]: runs a program with the report on stdin, the way
//!   `mail -s subject root` is usually driven from cron.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ldapsync_core::{NotificationError, Notifier};
use reqwest::{Client, Url};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::destinations::http_client;
use crate::load_config::NotificationSection;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    text: &'a str,
}

pub struct WebhookNotifier {
    http: Client,
    url: Url,
    subject: String,
}

impl WebhookNotifier {
    pub fn new(http: Client, url: &str, subject: impl Into<String>) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid webhook URL {url}: {e}"))?;
        Ok(Self {
            http,
            url,
            subject: subject.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_report(&self, text: &str) -> Result<(), NotificationError> {
        let response = self
            .http
            .post(self.url.clone())
            .json(&WebhookPayload {
                subject: &self.subject,
                text,
            })
            .send()
            .await
            .map_err(|e| NotificationError::new(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, body = %body, "Webhook rejected report");
            return Err(NotificationError::new(format!(
                "webhook returned HTTP {status}: {body}"
            )));
        }
        info!(%status, "Report delivered to webhook");
        Ok(())
    }
}

pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandNotifier {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn send_report(&self, text: &str) -> Result<(), NotificationError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| NotificationError::new(format!("failed to start {}: {e}", self.program)))?;

        let deliver = async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(text.as_bytes())
                    .await
                    .map_err(|e| NotificationError::new(format!("failed to write report: {e}")))?;
                // Closing stdin lets the program see end of input.
                drop(stdin);
            }
            child.wait().await.map_err(|e| {
                NotificationError::new(format!("failed to wait for {}: {e}", self.program))
            })
        };
        let outcome = tokio::time::timeout(self.timeout, deliver).await;

        let status = match outcome {
            Ok(result) => result?,
            Err(_) => {
                error!(program = %self.program, timeout = ?self.timeout, "Notification command timed out");
                if let Err(e) = child.kill().await {
                    warn!(program = %self.program, error = %e, "Failed to kill notification command");
                }
                return Err(NotificationError::new(format!(
                    "{} did not finish within {:?}",
                    self.program, self.timeout
                )));
            }
        };
        if !status.success() {
            error!(program = %self.program, %status, "Notification command failed");
            return Err(NotificationError::new(format!(
                "{} exited with {status}",
                self.program
            )));
        }
        info!(program = %self.program, "Report delivered to command");
        Ok(())
    }
}

pub fn build_notifier(section: &NotificationSection, timeout: Duration) -> Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match section {
        NotificationSection::Webhook { url, subject } => {
            Arc::new(WebhookNotifier::new(http_client(timeout)?, url, subject.clone())?)
        }
        NotificationSection::Command { program, args } => {
            Arc::new(CommandNotifier::new(program.clone(), args.clone(), timeout))
        }
    };
    Ok(notifier)
}

//! New-mail notifications.
//!
//! Polls the signed-in user's Microsoft Graph mailbox and reports messages
//! that were not in the previous listing.

pub mod client;
pub mod watcher;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use client::{EmailAddress, GraphMailClient, MailItem, Recipient};
pub use watcher::{MailBatch, MailDetector, MailEvent, MailWatcher};

/// Environment variable that overrides `mail.accessToken`.
pub const TOKEN_ENV_VAR: &str = "CRMWATCH_GRAPH_TOKEN";

/// Mail watcher configuration stored in ~/.crmwatch/config.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_poll_interval_minutes")]
    pub poll_interval_minutes: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_top")]
    pub top: u32,
    /// Report the whole mailbox as new on the first successful poll.
    #[serde(default = "default_announce_initial_mailbox")]
    pub announce_initial_mailbox: bool,
}

fn default_graph_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_poll_interval_minutes() -> u64 {
    10
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_top() -> u32 {
    50
}

fn default_announce_initial_mailbox() -> bool {
    true
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            graph_base_url: default_graph_base_url(),
            access_token: None,
            poll_interval_minutes: default_poll_interval_minutes(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            top: default_top(),
            announce_initial_mailbox: default_announce_initial_mailbox(),
        }
    }
}

impl MailConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes.saturating_mul(60))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// The bearer token to use: the environment wins over the file.
    pub fn resolved_token(&self) -> Option<String> {
        token_from(std::env::var(TOKEN_ENV_VAR).ok(), self.access_token.as_deref())
    }
}

fn token_from(env: Option<String>, file: Option<&str>) -> Option<String> {
    let clean = |t: &str| Some(t.trim().to_string()).filter(|t| !t.is_empty());
    env.as_deref().and_then(clean).or_else(|| file.and_then(clean))
}

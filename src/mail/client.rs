//! Microsoft Graph mailbox client.
//!
//! Lists the newest messages in the signed-in user's mailbox. Only the
//! fields the watcher reports are requested via `$select`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WatchError;
use crate::http;
use crate::poller::RecordSource;

const SELECT_FIELDS: &str =
    "id,receivedDateTime,subject,from,bodyPreview,isRead,importance,hasAttachments";

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct MessageListResponse {
    #[serde(default)]
    value: Vec<serde_json::Value>,
}

// ============================================================================
// Public types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    #[serde(default)]
    pub email_address: EmailAddress,
}

/// One message from `/me/messages`. Identity is `id` alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailItem {
    pub id: String,
    #[serde(rename = "receivedDateTime", default)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<Recipient>,
    #[serde(default)]
    pub body_preview: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub importance: Option<String>,
    #[serde(default)]
    pub has_attachments: bool,
}

impl MailItem {
    /// Display name of the sender, falling back to the address.
    pub fn sender(&self) -> Option<&str> {
        let addr = &self.from.as_ref()?.email_address;
        if !addr.name.is_empty() {
            Some(&addr.name)
        } else if !addr.address.is_empty() {
            Some(&addr.address)
        } else {
            None
        }
    }
}

// ============================================================================
// Graph API
// ============================================================================

pub struct GraphMailClient {
    client: reqwest::Client,
    url: url::Url,
    access_token: String,
    top: u32,
}

impl GraphMailClient {
    pub fn new(
        graph_base_url: &str,
        access_token: String,
        top: u32,
        timeout: Duration,
    ) -> Result<Self, WatchError> {
        Ok(Self {
            client: http::build_client(timeout)?,
            url: http::join_url(graph_base_url, "me/messages")?,
            access_token,
            top,
        })
    }

    /// Newest `top` messages, most recent first.
    pub async fn fetch_mail(&self) -> Result<Vec<MailItem>, WatchError> {
        let request = self
            .client
            .get(self.url.clone())
            .bearer_auth(&self.access_token)
            .query(&[
                ("$top", self.top.to_string().as_str()),
                ("$select", SELECT_FIELDS),
                ("$orderby", "receivedDateTime desc"),
            ]);
        let list: MessageListResponse = http::get_json(request).await?;
        Ok(http::decode_records(list.value, "message"))
    }
}

#[async_trait]
impl RecordSource for GraphMailClient {
    type Record = MailItem;

    async fn fetch(&self) -> Result<Vec<MailItem>, WatchError> {
        self.fetch_mail().await
    }
}

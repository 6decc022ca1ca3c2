//! REST client for the CRM backend's opportunity list.
//!
//! `GET {base}/opportunities/` returns every opportunity as a JSON array; the
//! watcher treats that array as the complete collection for a cycle.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WatchError;
use crate::http;
use crate::poller::RecordSource;

/// An opportunity as the backend returns it. Only the fields the watcher
/// and the alert text need are typed; the rest ride along in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    #[serde(deserialize_with = "crate::util::deserialize_id")]
    pub id: String,
    /// When the opportunity entered its current step. Ages are measured
    /// from here.
    #[serde(default)]
    pub current_step_date: Option<String>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub reference_project: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub struct OpportunityClient {
    client: reqwest::Client,
    url: url::Url,
}

impl OpportunityClient {
    pub fn new(api_base_url: &str, timeout: Duration) -> Result<Self, WatchError> {
        Ok(Self {
            client: http::build_client(timeout)?,
            url: http::join_url(api_base_url, "opportunities/")?,
        })
    }

    pub async fn fetch_opportunities(&self) -> Result<Vec<Opportunity>, WatchError> {
        let request = self
            .client
            .get(self.url.clone())
            .header("Accept", "application/json");
        let values: Vec<serde_json::Value> = http::get_json(request).await?;
        Ok(http::decode_records(values, "opportunity"))
    }
}

#[async_trait]
impl RecordSource for OpportunityClient {
    type Record = Opportunity;

    async fn fetch(&self) -> Result<Vec<Opportunity>, WatchError> {
        self.fetch_opportunities().await
    }
}

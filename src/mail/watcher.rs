//! New-mail watcher.
//!
//! Each cycle compares the mailbox listing's ids with the previous listing
//! and reports the messages that were not there before as `NEW_ITEMS`.
//! Any other difference (removals, reorderings, read state) only refreshes
//! the snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::client::{GraphMailClient, MailItem};
use super::MailConfig;
use crate::clock::{Clock, SystemClock};
use crate::error::{CycleFailure, WatchError};
use crate::poller::{
    CycleDiff, CycleOutcome, Detector, ListenerHandle, Poller, PollerOptions, PollerStatus,
    RecordSource,
};

pub const POLLER_NAME: &str = "mail";

#[derive(Debug, Clone, Serialize)]
pub struct MailBatch {
    pub emails: Vec<MailItem>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Serialized as `{"type": "NEW_ITEMS", "emails": [...], "count", "timestamp"}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MailEvent {
    NewItems(MailBatch),
}

/// Messages in `current` whose id is not in `previous`, in listing order.
pub fn new_arrivals(previous: &[MailItem], current: &[MailItem]) -> Vec<MailItem> {
    let seen: HashSet<&str> = previous.iter().map(|m| m.id.as_str()).collect();
    current
        .iter()
        .filter(|m| !seen.contains(m.id.as_str()))
        .cloned()
        .collect()
}

pub struct MailDetector {
    announce_initial: bool,
}

impl MailDetector {
    pub fn new(announce_initial: bool) -> Self {
        Self { announce_initial }
    }
}

impl Detector for MailDetector {
    type Raw = MailItem;
    type Item = MailItem;
    type Event = MailEvent;

    /// Drops repeated ids, keeping the first occurrence.
    fn classify(&self, raw: Vec<MailItem>, _now: DateTime<Utc>) -> Vec<MailItem> {
        let mut seen = HashSet::new();
        raw.into_iter().filter(|m| seen.insert(m.id.clone())).collect()
    }

    fn diff(
        &self,
        previous: Option<&[MailItem]>,
        current: &[MailItem],
        now: DateTime<Utc>,
    ) -> CycleDiff<MailEvent> {
        let changed = previous.unwrap_or(&[]) != current;

        let arrivals = match previous {
            Some(previous) => new_arrivals(previous, current),
            None if self.announce_initial => current.to_vec(),
            None => {
                log::debug!("Mail: baseline of {} messages", current.len());
                Vec::new()
            }
        };

        if !changed && arrivals.is_empty() {
            return CycleDiff::unchanged();
        }

        let mut events = Vec::new();
        if !arrivals.is_empty() {
            log::info!("Mail: {} new messages", arrivals.len());
            events.push(MailEvent::NewItems(MailBatch {
                count: arrivals.len(),
                emails: arrivals,
                timestamp: now,
            }));
        }

        CycleDiff { changed, events }
    }
}

pub struct MailWatcher {
    poller: Poller<MailDetector>,
}

impl MailWatcher {
    pub fn new(
        source: Arc<dyn RecordSource<Record = MailItem>>,
        config: &MailConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            poller: Poller::new(
                PollerOptions {
                    name: POLLER_NAME.to_string(),
                    interval: config.poll_interval(),
                    fetch_timeout: config.fetch_timeout(),
                },
                source,
                MailDetector::new(config.announce_initial_mailbox),
                clock,
            ),
        }
    }

    /// Watcher backed by Microsoft Graph. Fails without an access token.
    pub fn from_config(config: &MailConfig) -> Result<Self, WatchError> {
        let token = config
            .resolved_token()
            .ok_or_else(|| WatchError::Config("mail watcher needs an access token".to_string()))?;
        let client = GraphMailClient::new(
            &config.graph_base_url,
            token,
            config.top,
            config.fetch_timeout(),
        )?;
        Ok(Self::new(Arc::new(client), config, Arc::new(SystemClock)))
    }

    pub fn start(&self) {
        self.poller.start();
    }

    pub fn stop(&self) {
        self.poller.stop();
    }

    pub async fn force_poll(&self) -> CycleOutcome {
        self.poller.force_poll().await
    }

    pub fn add_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&MailEvent) + Send + Sync + 'static,
    {
        self.poller.add_listener(callback)
    }

    pub fn add_error_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&CycleFailure) + Send + Sync + 'static,
    {
        self.poller.add_error_listener(callback)
    }

    /// The most recent mailbox listing.
    pub fn mailbox(&self) -> Arc<Vec<MailItem>> {
        self.poller.snapshot()
    }

    pub fn status(&self) -> PollerStatus {
        self.poller.status()
    }
}

//! Critical-opportunity watcher.
//!
//! Keeps only the critical subset of the opportunity list (oldest first) and
//! reports two things per cycle: the critical set changed (`UPDATE`, drives
//! the badge) and records that just crossed into the critical band
//! (`CRITICAL_ALERT`, drives the desktop notification).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::client::{Opportunity, OpportunityClient};
use super::severity::{age_days, classify, ClassifiedOpportunity, Severity, SeverityThresholds};
use super::OpportunityConfig;
use crate::clock::{Clock, SystemClock};
use crate::error::{CycleFailure, WatchError};
use crate::notification::{self, AlertDispatcher};
use crate::poller::{
    CycleDiff, CycleOutcome, Detector, ListenerHandle, Poller, PollerOptions, PollerStatus,
    RecordSource,
};

pub const POLLER_NAME: &str = "opportunities";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct NotificationBatch {
    pub notifications: Vec<ClassifiedOpportunity>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

impl NotificationBatch {
    fn new(notifications: Vec<ClassifiedOpportunity>, timestamp: DateTime<Utc>) -> Self {
        Self {
            count: notifications.len(),
            notifications,
            timestamp,
        }
    }
}

/// Serialized as `{"type": "UPDATE" | "CRITICAL_ALERT", "notifications": [...], "count", "timestamp"}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpportunityEvent {
    /// The full critical list, whenever it changed.
    Update(NotificationBatch),
    /// Only the records that crossed into the critical band this cycle.
    CriticalAlert(NotificationBatch),
}

impl OpportunityEvent {
    pub fn batch(&self) -> &NotificationBatch {
        match self {
            OpportunityEvent::Update(batch) | OpportunityEvent::CriticalAlert(batch) => batch,
        }
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Classify every record and keep the critical ones, oldest first.
/// Records without a usable step date are dropped.
pub fn critical_opportunities(
    records: Vec<Opportunity>,
    thresholds: &SeverityThresholds,
    now: DateTime<Utc>,
) -> Vec<ClassifiedOpportunity> {
    let total = records.len();
    let mut classified: Vec<ClassifiedOpportunity> = records
        .into_iter()
        .filter_map(|record| classify(record, thresholds, now))
        .collect();

    let skipped = total - classified.len();
    if skipped > 0 {
        log::debug!("Opportunities: {} records without a usable step date skipped", skipped);
    }

    classified.retain(|c| c.severity == Severity::Critical);
    sort_oldest_first(&mut classified);
    classified
}

fn sort_oldest_first(list: &mut [ClassifiedOpportunity]) {
    list.sort_by(|a, b| b.age_days.cmp(&a.age_days).then_with(|| a.id().cmp(b.id())));
}

/// Re-age a committed list to `now`. Severity follows the new age.
pub fn reaged(
    list: &[ClassifiedOpportunity],
    thresholds: &SeverityThresholds,
    now: DateTime<Utc>,
) -> Vec<ClassifiedOpportunity> {
    let mut list: Vec<ClassifiedOpportunity> = list
        .iter()
        .map(|c| {
            let age = age_days(c.reference_at, now);
            ClassifiedOpportunity {
                age_days: age,
                severity: thresholds.severity(age),
                ..c.clone()
            }
        })
        .collect();
    sort_oldest_first(&mut list);
    list
}

/// True when membership or any record's reference timestamp differs.
pub fn critical_set_changed(previous: &[ClassifiedOpportunity], current: &[ClassifiedOpportunity]) -> bool {
    if previous.len() != current.len() {
        return true;
    }
    let keys = |list: &[ClassifiedOpportunity]| -> HashSet<(String, DateTime<Utc>)> {
        list.iter().map(|c| (c.id().to_string(), c.reference_at)).collect()
    };
    keys(previous) != keys(current)
}

/// Records that crossed into the critical band since the previous cycle.
///
/// With no previous observation there is nothing to compare against, so
/// nothing counts as escalated. Otherwise a current critical record
/// escalated if it was not in the previous critical set, or if its previous
/// sighting, aged from its own reference timestamp, is still below the
/// critical threshold.
pub fn detect_newly_escalated(
    previous: Option<&[ClassifiedOpportunity]>,
    current: &[ClassifiedOpportunity],
    thresholds: &SeverityThresholds,
    now: DateTime<Utc>,
) -> Vec<ClassifiedOpportunity> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    let seen: HashMap<&str, &ClassifiedOpportunity> = previous.iter().map(|p| (p.id(), p)).collect();

    current
        .iter()
        .filter(|c| c.severity == Severity::Critical)
        .filter(|c| match seen.get(c.id()) {
            None => true,
            Some(prev) => age_days(prev.reference_at, now) < thresholds.critical_days,
        })
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

pub struct OpportunityDetector {
    thresholds: SeverityThresholds,
}

impl OpportunityDetector {
    pub fn new(thresholds: SeverityThresholds) -> Self {
        Self { thresholds }
    }
}

impl Detector for OpportunityDetector {
    type Raw = Opportunity;
    type Item = ClassifiedOpportunity;
    type Event = OpportunityEvent;

    fn classify(&self, raw: Vec<Opportunity>, now: DateTime<Utc>) -> Vec<ClassifiedOpportunity> {
        critical_opportunities(raw, &self.thresholds, now)
    }

    fn diff(
        &self,
        previous: Option<&[ClassifiedOpportunity]>,
        current: &[ClassifiedOpportunity],
        now: DateTime<Utc>,
    ) -> CycleDiff<OpportunityEvent> {
        let changed = critical_set_changed(previous.unwrap_or(&[]), current);
        let escalated = detect_newly_escalated(previous, current, &self.thresholds, now);

        if !changed && escalated.is_empty() {
            return CycleDiff::unchanged();
        }

        log::info!("Opportunities: {} critical", current.len());
        let mut events = Vec::with_capacity(2);
        if !escalated.is_empty() {
            log::warn!(
                "Opportunities: {} just crossed {} days",
                escalated.len(),
                self.thresholds.critical_days
            );
            events.push(OpportunityEvent::CriticalAlert(NotificationBatch::new(escalated, now)));
        }
        events.push(OpportunityEvent::Update(NotificationBatch::new(current.to_vec(), now)));

        CycleDiff {
            changed: true,
            events,
        }
    }
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

pub struct OpportunityWatcher {
    poller: Poller<OpportunityDetector>,
    thresholds: SeverityThresholds,
    clock: Arc<dyn Clock>,
}

impl OpportunityWatcher {
    /// Build a watcher around any record source. When `alerts` is given,
    /// every `CRITICAL_ALERT` also raises a desktop notification (if the
    /// platform permission is granted).
    pub fn new(
        source: Arc<dyn RecordSource<Record = Opportunity>>,
        config: &OpportunityConfig,
        clock: Arc<dyn Clock>,
        alerts: Option<Arc<AlertDispatcher>>,
    ) -> Self {
        let thresholds = config.thresholds();
        let poller = Poller::new(
            PollerOptions {
                name: POLLER_NAME.to_string(),
                interval: config.poll_interval(),
                fetch_timeout: config.fetch_timeout(),
            },
            source,
            OpportunityDetector::new(thresholds),
            clock.clone(),
        );

        if let Some(alerts) = alerts {
            poller.add_listener(move |event| {
                if let OpportunityEvent::CriticalAlert(batch) = event {
                    notification::notify_critical_opportunities(
                        &alerts,
                        &batch.notifications,
                        thresholds.critical_days,
                    );
                }
            });
        }

        Self {
            poller,
            thresholds,
            clock,
        }
    }

    /// Watcher backed by the CRM REST API and the system clock.
    pub fn from_config(
        config: &OpportunityConfig,
        alerts: Option<Arc<AlertDispatcher>>,
    ) -> Result<Self, WatchError> {
        let client = OpportunityClient::new(&config.api_base_url, config.fetch_timeout())?;
        Ok(Self::new(Arc::new(client), config, Arc::new(SystemClock), alerts))
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
        F: Fn(&OpportunityEvent) + Send + Sync + 'static,
    {
        self.poller.add_listener(callback)
    }

    pub fn add_error_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&CycleFailure) + Send + Sync + 'static,
    {
        self.poller.add_error_listener(callback)
    }

    /// Listen to `CRITICAL_ALERT` batches only.
    pub fn on_critical_alert<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&NotificationBatch) + Send + Sync + 'static,
    {
        self.poller.add_listener(move |event| {
            if let OpportunityEvent::CriticalAlert(batch) = event {
                callback(batch);
            }
        })
    }

    /// Current critical list, oldest first, with ages as of now. Membership
    /// is the last committed cycle's.
    pub fn critical(&self) -> Vec<ClassifiedOpportunity> {
        reaged(&self.poller.snapshot(), &self.thresholds, self.clock.now())
    }

    pub fn status(&self) -> PollerStatus {
        self.poller.status()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

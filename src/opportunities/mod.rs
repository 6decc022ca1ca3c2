//! Aging-opportunity alerts.
//!
//! Polls the CRM backend's opportunity list, classifies every record by how
//! long its current step has been stalled, and raises an alert the moment a
//! record crosses into the critical band.

pub mod client;
pub mod severity;
pub mod watcher;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use client::{Opportunity, OpportunityClient};
pub use severity::{ClassifiedOpportunity, Severity, SeverityThresholds};
pub use watcher::{OpportunityDetector, OpportunityEvent, OpportunityWatcher};

/// Opportunity watcher configuration stored in ~/.crmwatch/config.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_warning_days")]
    pub warning_days: i64,
    #[serde(default = "default_critical_days")]
    pub critical_days: i64,
}

fn default_enabled() -> bool {
    true
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_warning_days() -> i64 {
    15
}

fn default_critical_days() -> i64 {
    51
}

impl Default for OpportunityConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            api_base_url: default_api_base_url(),
            poll_interval_secs: default_poll_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            warning_days: default_warning_days(),
            critical_days: default_critical_days(),
        }
    }
}

impl OpportunityConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn thresholds(&self) -> SeverityThresholds {
        SeverityThresholds {
            warning_days: self.warning_days,
            critical_days: self.critical_days,
        }
    }
}

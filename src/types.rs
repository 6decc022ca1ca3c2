use serde::{Deserialize, Serialize};

use crate::error::WatchError;
use crate::mail::MailConfig;
use crate::opportunities::OpportunityConfig;

/// Desktop notification preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub desktop: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { desktop: true }
    }
}

/// Configuration stored in ~/.crmwatch/config.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub opportunities: OpportunityConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Config {
    /// Reject settings the watchers cannot run with.
    pub fn validate(&self) -> Result<(), WatchError> {
        let opp = &self.opportunities;
        if opp.poll_interval_secs == 0 {
            return Err(WatchError::Config("opportunities.pollIntervalSecs must be > 0".into()));
        }
        if opp.fetch_timeout_secs == 0 {
            return Err(WatchError::Config("opportunities.fetchTimeoutSecs must be > 0".into()));
        }
        if opp.warning_days >= opp.critical_days {
            return Err(WatchError::Config(format!(
                "opportunities.warningDays ({}) must be below criticalDays ({})",
                opp.warning_days, opp.critical_days
            )));
        }

        let mail = &self.mail;
        if mail.poll_interval_minutes == 0 {
            return Err(WatchError::Config("mail.pollIntervalMinutes must be > 0".into()));
        }
        if mail.fetch_timeout_secs == 0 {
            return Err(WatchError::Config("mail.fetchTimeoutSecs must be > 0".into()));
        }
        if mail.enabled && mail.resolved_token().is_none() {
            return Err(WatchError::Config(format!(
                "mail is enabled but no access token is set (mail.accessToken or {})",
                crate::mail::TOKEN_ENV_VAR
            )));
        }

        Ok(())
    }
}

//! Age-based severity classification.
//!
//! Pure functions only. Severity is always recomputed from `age_days` and
//! never stored on its own.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::client::Opportunity;
use crate::util::parse_timestamp;

const MILLIS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
}

/// Day thresholds, inclusive at the lower bound of each band:
/// Normal `< warning_days <=` Warning `< critical_days <=` Critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityThresholds {
    pub warning_days: i64,
    pub critical_days: i64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            warning_days: 15,
            critical_days: 51,
        }
    }
}

impl SeverityThresholds {
    pub fn severity(&self, age_days: i64) -> Severity {
        if age_days >= self.critical_days {
            Severity::Critical
        } else if age_days >= self.warning_days {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }
}

/// Whole days elapsed from `reference` to `now`, rounded toward negative
/// infinity. A reference in the future yields a negative age.
pub fn age_days(reference: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - reference).num_milliseconds().div_euclid(MILLIS_PER_DAY)
}

/// An opportunity with its age and severity as of one evaluation instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedOpportunity {
    #[serde(flatten)]
    pub record: Opportunity,
    pub reference_at: DateTime<Utc>,
    pub age_days: i64,
    pub severity: Severity,
}

impl ClassifiedOpportunity {
    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// Classify one opportunity at `now`. Returns `None` when the record has no
/// usable reference timestamp; such records cannot be aged and are left out
/// of every severity band.
pub fn classify(
    record: Opportunity,
    thresholds: &SeverityThresholds,
    now: DateTime<Utc>,
) -> Option<ClassifiedOpportunity> {
    let reference_at = record.current_step_date.as_deref().and_then(parse_timestamp)?;
    let age = age_days(reference_at, now);
    Some(ClassifiedOpportunity {
        record,
        reference_at,
        age_days: age,
        severity: thresholds.severity(age),
    })
}

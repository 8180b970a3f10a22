// src/schedule.rs
//! Schedule records and the timing state machine that decides when a tracked
//! dataset version gets re-checked.
//!
//! States are implicit in field combinations rather than an enum:
//! - *eligible*: `check_enabled` and below the failure ceiling
//! - *due*: eligible and `next_check_at` unset or in the past
//! - *disabled*: at/over the failure ceiling, until an operator re-enables
//!
//! All time-dependent methods take `now` explicitly so tests own the clock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Consecutive failures at which a record stops being checked.
pub const FAILURE_CEILING: u32 = 5;

/// Expected update cadence of an external provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

impl Cadence {
    pub fn interval(self) -> Duration {
        match self {
            Cadence::Daily => Duration::days(1),
            Cadence::Weekly => Duration::days(7),
            Cadence::Monthly => Duration::days(30),
            Cadence::Quarterly => Duration::days(90),
            Cadence::Annual => Duration::days(365),
        }
    }
}

/// An external provider plus its expected update cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: u64,
    pub name: String,
    pub organization: Option<String>,
    pub cadence: Option<Cadence>,
    pub is_active: bool,
}

impl DataSource {
    pub fn new(id: u64, name: impl Into<String>, cadence: Option<Cadence>) -> Self {
        Self {
            id,
            name: name.into(),
            organization: None,
            cadence,
            is_active: true,
        }
    }
}

/// Per dataset-version check-state row.
///
/// Mutated only by the job lifecycle wrapper (`mark_checked`) and the
/// reliability scorer (`reliability_score` field); never deleted
/// automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: u64,
    pub data_source_id: u64,
    pub version: String,

    /// SHA-256 hex fingerprint of the last known upstream content.
    pub checksum: Option<String>,
    pub check_enabled: bool,

    pub last_checked_at: Option<DateTime<Utc>>,
    /// Last time upstream content actually changed.
    pub last_updated_at: Option<DateTime<Utc>>,
    pub next_check_at: Option<DateTime<Utc>>,

    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub reliability_score: Option<f64>,

    pub last_records_added: Option<u64>,
    pub last_records_updated: Option<u64>,
    pub last_duration_secs: Option<f64>,
}

/// Result of one check attempt, fed into `mark_checked`.
#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    pub has_changes: bool,
    pub new_checksum: Option<String>,
    pub records_added: u64,
    pub records_updated: u64,
    pub duration_secs: f64,
    pub error: Option<String>,
}

impl CheckOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn unchanged(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            ..Default::default()
        }
    }
}

impl ScheduleRecord {
    pub fn new(id: u64, data_source_id: u64, version: impl Into<String>) -> Self {
        Self {
            id,
            data_source_id,
            version: version.into(),
            checksum: None,
            check_enabled: true,
            last_checked_at: None,
            last_updated_at: None,
            next_check_at: None,
            consecutive_failures: 0,
            last_error: None,
            reliability_score: None,
            last_records_added: None,
            last_records_updated: None,
            last_duration_secs: None,
        }
    }

    /// Whether this record is due for a check at `now`.
    ///
    /// Disabled records and records at the failure ceiling are never due; a
    /// never-checked record (no `next_check_at`) always is.
    pub fn should_check(&self, now: DateTime<Utc>) -> bool {
        if !self.check_enabled {
            return false;
        }
        if self.consecutive_failures >= FAILURE_CEILING {
            return false;
        }
        match self.next_check_at {
            None => true,
            Some(next) => now >= next,
        }
    }

    /// Next check time from the source cadence; 30 days when the cadence is
    /// unknown or the source is missing.
    pub fn calculate_next_check(
        &self,
        now: DateTime<Utc>,
        source: Option<&DataSource>,
    ) -> DateTime<Utc> {
        let interval = source
            .and_then(|s| s.cadence)
            .map(Cadence::interval)
            .unwrap_or_else(|| Duration::days(30));
        now + interval
    }

    /// Record the outcome of a check attempt.
    ///
    /// `next_check_at` is recomputed on every attempt, success or failure:
    /// a failing source is retried on its normal cadence, not a tightened
    /// backoff. Failures leave checksum and content fields untouched.
    pub fn mark_checked(
        &mut self,
        now: DateTime<Utc>,
        source: Option<&DataSource>,
        outcome: CheckOutcome,
    ) {
        self.last_checked_at = Some(now);

        match outcome.error {
            Some(err) => {
                self.consecutive_failures += 1;
                self.last_error = Some(err);
            }
            None => {
                self.consecutive_failures = 0;
                self.last_error = None;

                if outcome.has_changes {
                    self.last_updated_at = Some(now);
                    if let Some(sum) = outcome.new_checksum {
                        self.checksum = Some(sum);
                    }
                    self.last_records_added = Some(outcome.records_added);
                    self.last_records_updated = Some(outcome.records_updated);
                }
                self.last_duration_secs = Some(outcome.duration_secs);
            }
        }

        self.next_check_at = Some(self.calculate_next_check(now, source));
    }
}

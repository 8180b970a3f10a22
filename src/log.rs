// src/log.rs
//! Execution logs: one append-and-finalize audit row per check attempt.
//!
//! A row is created `Pending` before the attempt body runs and transitions
//! exactly once to a terminal state. The lifecycle wrapper guarantees one
//! terminal call per attempt; a second terminal call is a programming error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl LogStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, LogStatus::Success | LogStatus::Failed | LogStatus::Skipped)
    }
}

/// Record counts reported by a connector's load step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub fetched: u64,
    pub added: u64,
    pub updated: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: u64,
    pub schedule_id: u64,
    pub job_id: Option<String>,
    pub status: LogStatus,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,

    pub counts: RecordCounts,

    pub checksum_before: Option<String>,
    pub checksum_after: Option<String>,
    pub has_changes: bool,

    pub error_message: Option<String>,
    pub error_trace: Option<String>,

    /// Free-form attempt metadata: retry counters, provider response
    /// metadata, skip reasons.
    pub metadata: Value,
}

impl ExecutionLog {
    pub fn new(
        id: u64,
        schedule_id: u64,
        job_id: Option<String>,
        checksum_before: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            schedule_id,
            job_id,
            status: LogStatus::Pending,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
            duration_secs: None,
            counts: RecordCounts::default(),
            checksum_before,
            checksum_after: None,
            has_changes: false,
            error_message: None,
            error_trace: None,
            metadata: Value::Null,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = LogStatus::Running;
        self.started_at = Some(now);
    }

    pub fn mark_success(
        &mut self,
        now: DateTime<Utc>,
        counts: RecordCounts,
        checksum_after: Option<String>,
        has_changes: bool,
        metadata: Value,
    ) {
        if self.refuse_double_terminal("success") {
            return;
        }
        self.status = LogStatus::Success;
        self.counts = counts;
        self.checksum_after = checksum_after;
        self.has_changes = has_changes;
        if !metadata.is_null() {
            self.merge_metadata(metadata);
        }
        self.finalize(now);
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, message: String, trace: Option<String>) {
        if self.refuse_double_terminal("failed") {
            return;
        }
        self.status = LogStatus::Failed;
        self.error_message = Some(message);
        self.error_trace = trace;
        self.finalize(now);
    }

    pub fn mark_skipped(&mut self, now: DateTime<Utc>, reason: &str) {
        if self.refuse_double_terminal("skipped") {
            return;
        }
        self.status = LogStatus::Skipped;
        self.merge_metadata(serde_json::json!({ "skip_reason": reason }));
        self.finalize(now);
    }

    /// Merge keys into the metadata object, creating it if absent.
    pub fn merge_metadata(&mut self, extra: Value) {
        match (&mut self.metadata, extra) {
            (Value::Object(base), Value::Object(add)) => {
                for (k, v) in add {
                    base.insert(k, v);
                }
            }
            (slot, add) if slot.is_null() => *slot = add,
            (slot, add) => {
                // Non-object metadata gets replaced rather than merged.
                *slot = add;
            }
        }
    }

    fn finalize(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            let micros = (now - started).num_microseconds().unwrap_or(0);
            self.duration_secs = Some(micros as f64 / 1_000_000.0);
        }
    }

    fn refuse_double_terminal(&self, attempted: &str) -> bool {
        if self.status.is_terminal() {
            debug_assert!(false, "terminal transition called twice on log {}", self.id);
            tracing::error!(
                log_id = self.id,
                current = ?self.status,
                attempted,
                "refusing to overwrite terminal execution log state"
            );
            return true;
        }
        false
    }
}

// src/job.rs
//! # Job Lifecycle Wrapper
//! Executes one check attempt for one schedule record and guarantees the
//! execution log and the schedule row always land in a consistent terminal
//! state; a record is never left "running".
//!
//! Retry is an explicit wrapper, not hidden framework state: a small fixed
//! number of attempts with a fixed delay, the attempt counter threaded
//! through each log row's metadata. Only transient errors re-invoke the
//! attempt; permanent errors end the cycle immediately.

use chrono::Utc;
use metrics::{counter, histogram};
use serde_json::json;

use crate::connector::{checksum, Connector};
use crate::dispatch::DispatchMessage;
use crate::error::IngestError;
use crate::log::{ExecutionLog, RecordCounts};
use crate::schedule::CheckOutcome;
use crate::store::{LogStore, ScheduleStore};

/// Retry/timeout policy shared by one job class.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_secs: u64,
    pub timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: 30,
            timeout_secs: 300,
        }
    }
}

/// Terminal result of a job (after retries, if any).
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Upstream content changed and was loaded.
    Updated(RecordCounts),
    /// Checksum matched; nothing fetched past the payload, nothing loaded.
    Unchanged,
    /// All attempts failed (or a permanent error ended the cycle early).
    Failed { error: String, attempts: u32 },
}

/// Run a job to completion, retrying transient failures on the policy's
/// fixed delay. Every attempt gets its own execution log row.
pub async fn run_with_retry(
    schedules: &ScheduleStore,
    logs: &LogStore,
    msg: &DispatchMessage,
    connector: &dyn Connector,
    policy: RetryPolicy,
) -> JobOutcome {
    let max_attempts = policy.max_attempts.max(1);

    let mut attempt = 1;
    loop {
        match run_attempt(schedules, logs, msg, connector, policy, attempt, max_attempts).await {
            Ok(outcome) => return outcome,
            Err(err) => {
                if err.is_transient() && attempt < max_attempts {
                    counter!("job_retries_total").increment(1);
                    tracing::info!(
                        schedule_id = msg.schedule_id,
                        attempt,
                        delay_secs = policy.delay_secs,
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(policy.delay_secs)).await;
                    attempt += 1;
                    continue;
                }
                counter!("jobs_failed_total").increment(1);
                return JobOutcome::Failed {
                    error: err.to_string(),
                    attempts: attempt,
                };
            }
        }
    }
}

/// One attempt end-to-end. On error the log row is already Failed and the
/// schedule row already updated before the error is returned; the caller
/// only decides whether to retry.
async fn run_attempt(
    schedules: &ScheduleStore,
    logs: &LogStore,
    msg: &DispatchMessage,
    connector: &dyn Connector,
    policy: RetryPolicy,
    attempt: u32,
    max_attempts: u32,
) -> Result<JobOutcome, IngestError> {
    let schedule = schedules
        .get(msg.schedule_id)
        .ok_or(IngestError::NotFound("schedule record", msg.schedule_id))?;
    let source = schedules.source(msg.data_source_id);
    let checksum_before = schedule.checksum.clone();

    let job_id = format!("{}-{}-a{}", msg.kind, msg.schedule_id, attempt);
    let log_id = logs.next_id();
    let started = Utc::now();
    let mut log = ExecutionLog::new(
        log_id,
        msg.schedule_id,
        Some(job_id),
        checksum_before.clone(),
        started,
    );
    log.merge_metadata(json!({ "attempt": attempt, "max_attempts": max_attempts }));
    log.mark_running(started);
    logs.insert(log);

    match attempt_body(connector, checksum_before.as_deref(), policy).await {
        Ok(AttemptResult::Unchanged { checksum_after }) => {
            let now = Utc::now();
            let duration = seconds_since(started, now);
            logs.update(log_id, |l| {
                l.checksum_after = Some(checksum_after);
                l.mark_skipped(now, "no changes detected (checksum match)");
            })?;
            schedules.update(msg.schedule_id, |rec| {
                rec.mark_checked(now, source.as_ref(), CheckOutcome::unchanged(duration));
            })?;
            counter!("jobs_skipped_total").increment(1);
            histogram!("job_duration_seconds").record(duration);
            tracing::info!(schedule_id = msg.schedule_id, "upstream unchanged, skipped");
            Ok(JobOutcome::Unchanged)
        }
        Ok(AttemptResult::Loaded { checksum_after, counts, metadata }) => {
            let now = Utc::now();
            let duration = seconds_since(started, now);
            logs.update(log_id, |l| {
                l.mark_success(now, counts, Some(checksum_after.clone()), true, metadata);
            })?;
            schedules.update(msg.schedule_id, |rec| {
                rec.mark_checked(
                    now,
                    source.as_ref(),
                    CheckOutcome {
                        has_changes: true,
                        new_checksum: Some(checksum_after),
                        records_added: counts.added,
                        records_updated: counts.updated,
                        duration_secs: duration,
                        error: None,
                    },
                );
            })?;
            counter!("jobs_success_total").increment(1);
            histogram!("job_duration_seconds").record(duration);
            tracing::info!(
                schedule_id = msg.schedule_id,
                added = counts.added,
                updated = counts.updated,
                "ingestion loaded changes"
            );
            Ok(JobOutcome::Updated(counts))
        }
        Err(err) => {
            let now = Utc::now();
            logs.update(log_id, |l| {
                l.mark_failed(now, err.to_string(), Some(format!("{err:?}")));
            })?;
            schedules.update(msg.schedule_id, |rec| {
                rec.mark_checked(now, source.as_ref(), CheckOutcome::failure(err.to_string()));
            })?;
            tracing::warn!(schedule_id = msg.schedule_id, attempt, error = %err, "attempt failed");
            Err(err)
        }
    }
}

enum AttemptResult {
    Unchanged {
        checksum_after: String,
    },
    Loaded {
        checksum_after: String,
        counts: RecordCounts,
        metadata: serde_json::Value,
    },
}

/// Fetch → checksum short-circuit → transform → load. No store writes; all
/// terminal bookkeeping stays in `run_attempt`.
async fn attempt_body(
    connector: &dyn Connector,
    checksum_before: Option<&str>,
    policy: RetryPolicy,
) -> Result<AttemptResult, IngestError> {
    // fetch() is the one network-bound step; the per-class timeout guards it.
    let raw = tokio::time::timeout(
        std::time::Duration::from_secs(policy.timeout_secs),
        connector.fetch(),
    )
    .await
    .map_err(|_| IngestError::Timeout(policy.timeout_secs))??;

    let checksum_after = checksum(&raw);
    if checksum_before == Some(checksum_after.as_str()) {
        // Idempotency short-circuit: no transform/load for unchanged content.
        return Ok(AttemptResult::Unchanged { checksum_after });
    }

    let records = connector.transform(raw)?;
    let stats = connector.load(&records).await?;

    Ok(AttemptResult::Loaded {
        checksum_after,
        counts: stats.counts,
        metadata: stats.metadata,
    })
}

fn seconds_since(start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>) -> f64 {
    (end - start).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0
}

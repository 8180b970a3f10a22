// tests/job_lifecycle.rs
// One check attempt end-to-end: checksum idempotence, bounded retry,
// permanent failures, timeouts, and the failure-ceiling auto-disable.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use statfuse::connector::fixture::{FixtureConnector, StatsMap};
use statfuse::connector::{Connector, ExtraParams, LoadStats};
use statfuse::dispatch::{DispatchMessage, JobKind};
use statfuse::error::IngestError;
use statfuse::job::{run_with_retry, JobOutcome, RetryPolicy};
use statfuse::log::LogStatus;
use statfuse::schedule::{Cadence, DataSource, ScheduleRecord};
use statfuse::store::{LogStore, ScheduleStore};

fn stores() -> (ScheduleStore, LogStore) {
    let schedules = ScheduleStore::new();
    schedules.insert_source(DataSource::new(1, "faostat", Some(Cadence::Annual)));
    schedules.insert(ScheduleRecord::new(1, 1, "crop-production-2025"));
    (schedules, LogStore::new())
}

fn msg() -> DispatchMessage {
    DispatchMessage {
        schedule_id: 1,
        data_source_id: 1,
        kind: JobKind::FaostatCrops,
        extra_params: ExtraParams::new(),
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        delay_secs: 0,
        timeout_secs: 5,
    }
}

fn fixture_payload() -> Value {
    serde_json::from_str(include_str!("fixtures/faostat_crops.json")).unwrap()
}

#[tokio::test]
async fn unchanged_upstream_is_skipped_with_zero_net_change() {
    let (schedules, logs) = stores();
    let stats: StatsMap = Default::default();
    let connector = FixtureConnector::new(fixture_payload(), stats.clone());

    // First run loads the two valid facts.
    let first = run_with_retry(&schedules, &logs, &msg(), &connector, fast_policy()).await;
    match first {
        JobOutcome::Updated(counts) => {
            assert_eq!(counts.fetched, 3);
            assert_eq!(counts.added, 2);
            assert_eq!(counts.skipped, 1); // the record with no sources
        }
        other => panic!("expected Updated, got {other:?}"),
    }
    let snapshot = stats.lock().unwrap().clone();
    assert_eq!(snapshot.len(), 2);

    // Second run against identical content: skipped, store untouched.
    let second = run_with_retry(&schedules, &logs, &msg(), &connector, fast_policy()).await;
    assert_eq!(second, JobOutcome::Unchanged);
    assert_eq!(*stats.lock().unwrap(), snapshot);

    let history = logs.all_for_schedule(1);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, LogStatus::Success);
    assert_eq!(history[1].status, LogStatus::Skipped);
    assert_eq!(history[1].metadata["skip_reason"], "no changes detected (checksum match)");
    // The skipped attempt still observed the same upstream fingerprint.
    assert_eq!(history[1].checksum_before, history[0].checksum_after);
    assert_eq!(history[1].checksum_after, history[0].checksum_after);
    assert_eq!(logs.non_terminal_count(), 0);

    // Schedule row: checked twice, content updated once, rescheduled.
    let rec = schedules.get(1).unwrap();
    assert_eq!(rec.consecutive_failures, 0);
    assert!(rec.last_checked_at.is_some());
    assert!(rec.last_updated_at.is_some());
    assert!(rec.next_check_at.unwrap() > Utc::now());
}

#[tokio::test]
async fn changed_upstream_reloads_and_rolls_checksum() {
    let (schedules, logs) = stores();
    let stats: StatsMap = Default::default();
    let connector = FixtureConnector::new(fixture_payload(), stats.clone());

    run_with_retry(&schedules, &logs, &msg(), &connector, fast_policy()).await;
    let checksum_v1 = schedules.get(1).unwrap().checksum.clone().unwrap();

    let mut payload = fixture_payload();
    payload["facts"][0]["sources"][0]["value"] = json!(1_600_000.0);
    connector.set_payload(payload);

    let outcome = run_with_retry(&schedules, &logs, &msg(), &connector, fast_policy()).await;
    match outcome {
        JobOutcome::Updated(counts) => {
            assert_eq!(counts.updated, 1); // maize moved
            assert_eq!(counts.skipped, 2); // cassava unchanged + broken record
        }
        other => panic!("expected Updated, got {other:?}"),
    }
    let checksum_v2 = schedules.get(1).unwrap().checksum.clone().unwrap();
    assert_ne!(checksum_v1, checksum_v2);
}

struct FlakyConnector {
    failures_left: AtomicU32,
    payload: Value,
}

#[async_trait]
impl Connector for FlakyConnector {
    async fn fetch(&self) -> Result<Value, IngestError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(IngestError::Transient("HTTP 503 from provider".into()));
        }
        Ok(self.payload.clone())
    }

    fn transform(&self, raw: Value) -> Result<Vec<Value>, IngestError> {
        Ok(vec![raw])
    }

    async fn load(&self, records: &[Value]) -> Result<LoadStats, IngestError> {
        Ok(LoadStats {
            counts: statfuse::log::RecordCounts {
                fetched: records.len() as u64,
                added: records.len() as u64,
                ..Default::default()
            },
            metadata: Value::Null,
        })
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

#[tokio::test(start_paused = true)]
async fn transient_failure_retries_and_threads_attempt_counter() {
    let (schedules, logs) = stores();
    let connector = FlakyConnector {
        failures_left: AtomicU32::new(2),
        payload: json!({"year": 2025}),
    };
    let policy = RetryPolicy {
        max_attempts: 3,
        delay_secs: 30,
        timeout_secs: 5,
    };

    let outcome = run_with_retry(&schedules, &logs, &msg(), &connector, policy).await;
    assert!(matches!(outcome, JobOutcome::Updated(_)));

    // Two failed attempts, then the success; each its own log row with the
    // attempt counter in metadata.
    let history = logs.all_for_schedule(1);
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].status, LogStatus::Failed);
    assert_eq!(history[1].status, LogStatus::Failed);
    assert_eq!(history[2].status, LogStatus::Success);
    for (i, log) in history.iter().enumerate() {
        assert_eq!(log.metadata["attempt"], i as u64 + 1);
        assert_eq!(log.metadata["max_attempts"], 3);
    }

    // The successful attempt reset the failure counter.
    assert_eq!(schedules.get(1).unwrap().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn permanent_error_stops_the_cycle_without_retry() {
    let (schedules, logs) = stores();

    struct BadAuth;
    #[async_trait]
    impl Connector for BadAuth {
        async fn fetch(&self) -> Result<Value, IngestError> {
            Err(IngestError::Permanent("401 unauthorized".into()))
        }
        fn transform(&self, _raw: Value) -> Result<Vec<Value>, IngestError> {
            unreachable!("fetch never succeeds")
        }
        async fn load(&self, _records: &[Value]) -> Result<LoadStats, IngestError> {
            unreachable!("fetch never succeeds")
        }
        fn name(&self) -> &'static str {
            "bad-auth"
        }
    }

    let outcome = run_with_retry(&schedules, &logs, &msg(), &BadAuth, fast_policy()).await;
    match outcome {
        JobOutcome::Failed { attempts, .. } => assert_eq!(attempts, 1),
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(logs.all_for_schedule(1).len(), 1);

    let rec = schedules.get(1).unwrap();
    assert_eq!(rec.consecutive_failures, 1);
    assert_eq!(rec.last_error.as_deref(), Some("permanent source error: 401 unauthorized"));
    // Failures reschedule on the normal cadence, no tightened backoff.
    assert!(rec.next_check_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_hits_the_job_class_timeout() {
    let (schedules, logs) = stores();

    struct Stalled;
    #[async_trait]
    impl Connector for Stalled {
        async fn fetch(&self) -> Result<Value, IngestError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
        fn transform(&self, _raw: Value) -> Result<Vec<Value>, IngestError> {
            Ok(Vec::new())
        }
        async fn load(&self, _records: &[Value]) -> Result<LoadStats, IngestError> {
            Ok(LoadStats::default())
        }
        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    let policy = RetryPolicy {
        max_attempts: 2,
        delay_secs: 1,
        timeout_secs: 10,
    };
    let outcome = run_with_retry(&schedules, &logs, &msg(), &Stalled, policy).await;
    match outcome {
        JobOutcome::Failed { error, attempts } => {
            assert!(error.contains("timed out"), "unexpected error: {error}");
            assert_eq!(attempts, 2); // timeouts are transient, so both attempts ran
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    // No log stuck in Running.
    assert_eq!(logs.non_terminal_count(), 0);
    assert_eq!(schedules.get(1).unwrap().consecutive_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn failure_ceiling_disables_checks_until_reenabled() {
    let (schedules, logs) = stores();

    struct AlwaysDown;
    #[async_trait]
    impl Connector for AlwaysDown {
        async fn fetch(&self) -> Result<Value, IngestError> {
            Err(IngestError::Permanent("shape mismatch".into()))
        }
        fn transform(&self, _raw: Value) -> Result<Vec<Value>, IngestError> {
            unreachable!()
        }
        async fn load(&self, _records: &[Value]) -> Result<LoadStats, IngestError> {
            unreachable!()
        }
        fn name(&self) -> &'static str {
            "down"
        }
    }

    for _ in 0..5 {
        run_with_retry(&schedules, &logs, &msg(), &AlwaysDown, fast_policy()).await;
    }

    let rec = schedules.get(1).unwrap();
    assert_eq!(rec.consecutive_failures, 5);
    assert!(!rec.should_check(Utc::now() + chrono::Duration::days(400)));

    // Operator re-enable is the only way back in.
    schedules.set_enabled(1, true).unwrap();
    assert!(schedules.get(1).unwrap().should_check(Utc::now()));
}

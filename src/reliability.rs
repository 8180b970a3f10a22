// src/reliability.rs
//! Reliability scoring: a blended trust metric per schedule record, derived
//! from its recent execution history. Runs on its own cadence, well apart
//! from the dispatcher sweep.
//!
//! score = 0.7 * successRate + 0.2 * consistency + 0.1 * recency, over the
//! last ten log rows. Writes are suppressed when the score moved less than
//! 0.05, so cosmetic churn never touches the store.

use metrics::counter;

use crate::log::LogStatus;
use crate::schedule::FAILURE_CEILING;
use crate::store::{LogStore, ScheduleStore};

/// How many recent log rows feed one score.
const HISTORY_WINDOW: usize = 10;
/// Minimum score movement that gets persisted.
const CHURN_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreSweepStats {
    pub updated: u64,
    pub unchanged: u64,
}

/// Recompute reliability scores for every enabled schedule record. Records
/// with no execution history are skipped entirely.
pub fn score_sweep(schedules: &ScheduleStore, logs: &LogStore) -> ScoreSweepStats {
    let mut stats = ScoreSweepStats::default();

    for record in schedules.enabled_records() {
        let recent = logs.recent_for_schedule(record.id, HISTORY_WINDOW);
        if recent.is_empty() {
            continue;
        }

        let successes = recent
            .iter()
            .filter(|l| l.status == LogStatus::Success)
            .count();
        let success_rate = successes as f64 / recent.len() as f64;

        let consistency =
            (1.0 - record.consecutive_failures as f64 / FAILURE_CEILING as f64).clamp(0.0, 1.0);

        let recency = if recent[0].status == LogStatus::Success {
            1.0
        } else {
            0.5
        };

        let score = 0.7 * success_rate + 0.2 * consistency + 0.1 * recency;
        let score = (score * 1000.0).round() / 1000.0;

        let stored = record.reliability_score.unwrap_or(0.0);
        if (score - stored).abs() > CHURN_THRESHOLD {
            if schedules
                .update(record.id, |rec| rec.reliability_score = Some(score))
                .is_ok()
            {
                stats.updated += 1;
                tracing::debug!(schedule_id = record.id, score, "reliability score updated");
            }
        } else {
            stats.unchanged += 1;
        }
    }

    counter!("reliability_sweeps_total").increment(1);
    tracing::info!(
        updated = stats.updated,
        unchanged = stats.unchanged,
        "reliability scores recomputed"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::ExecutionLog;
    use crate::schedule::{DataSource, ScheduleRecord};
    use chrono::{DateTime, Duration, Utc};
    use serde_json::Value;

    fn now() -> DateTime<Utc> {
        "2026-03-01T00:00:00Z".parse().unwrap()
    }

    fn stores() -> (ScheduleStore, LogStore) {
        let schedules = ScheduleStore::new();
        schedules.insert_source(DataSource::new(1, "faostat", None));
        schedules.insert(ScheduleRecord::new(1, 1, "v1"));
        (schedules, LogStore::new())
    }

    fn push_log(logs: &LogStore, id: u64, status: LogStatus, offset_hours: i64) {
        let mut log =
            ExecutionLog::new(id, 1, None, None, now() + Duration::hours(offset_hours));
        log.mark_running(log.created_at);
        match status {
            LogStatus::Success => {
                log.mark_success(log.created_at, Default::default(), None, false, Value::Null)
            }
            LogStatus::Failed => log.mark_failed(log.created_at, "boom".into(), None),
            LogStatus::Skipped => log.mark_skipped(log.created_at, "checksum match"),
            _ => {}
        }
        logs.insert(log);
    }

    #[test]
    fn no_history_is_skipped_not_scored() {
        let (schedules, logs) = stores();
        let stats = score_sweep(&schedules, &logs);
        assert_eq!(stats, ScoreSweepStats::default());
        assert_eq!(schedules.get(1).unwrap().reliability_score, None);
    }

    #[test]
    fn all_success_history_scores_high() {
        let (schedules, logs) = stores();
        for i in 0..10 {
            push_log(&logs, i + 1, LogStatus::Success, i as i64);
        }
        let stats = score_sweep(&schedules, &logs);
        assert_eq!(stats.updated, 1);
        // 0.7*1.0 + 0.2*1.0 + 0.1*1.0
        assert_eq!(schedules.get(1).unwrap().reliability_score, Some(1.0));
    }

    #[test]
    fn recent_failure_halves_recency_component() {
        let (schedules, logs) = stores();
        for i in 0..9 {
            push_log(&logs, i + 1, LogStatus::Success, i as i64);
        }
        push_log(&logs, 10, LogStatus::Failed, 9); // newest
        schedules
            .update(1, |rec| rec.consecutive_failures = 1)
            .unwrap();

        score_sweep(&schedules, &logs);
        // successRate 0.9, consistency 0.8, recency 0.5
        let score = schedules.get(1).unwrap().reliability_score.unwrap();
        assert!((score - (0.7 * 0.9 + 0.2 * 0.8 + 0.1 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn small_score_moves_are_suppressed() {
        let (schedules, logs) = stores();
        for i in 0..10 {
            push_log(&logs, i + 1, LogStatus::Success, i as i64);
        }
        schedules
            .update(1, |rec| rec.reliability_score = Some(0.98))
            .unwrap();

        let stats = score_sweep(&schedules, &logs);
        assert_eq!(stats.updated, 0);
        assert_eq!(stats.unchanged, 1);
        // Stored value untouched.
        assert_eq!(schedules.get(1).unwrap().reliability_score, Some(0.98));
    }
}

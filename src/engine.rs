// src/engine.rs
//! One explicit engine context per process (schedule store, log store,
//! routing registry, config) passed into every sweep and worker function.
//! No import-time singletons.
//!
//! Background loops share one shape: a tokio interval, one cheap pass,
//! counters and a structured log line per tick. Job execution is the only
//! I/O-bound part and runs on spawned tasks bounded by a worker semaphore.

use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::connector::ConnectorFactory;
use crate::dispatch::{sweep, JobRegistry, SweepStats};
use crate::job::run_with_retry;
use crate::reliability::score_sweep;
use crate::store::{LogStore, ScheduleStore};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("sweep_runs_total", "Dispatcher sweeps executed.");
        describe_counter!(
            "sweep_record_errors_total",
            "Records whose sweep evaluation errored."
        );
        describe_counter!(
            "sweep_unroutable_total",
            "Due records with no matching job type."
        );
        describe_counter!("jobs_success_total", "Check attempts that loaded changes.");
        describe_counter!(
            "jobs_skipped_total",
            "Check attempts short-circuited by checksum match."
        );
        describe_counter!("jobs_failed_total", "Jobs failed after exhausting retries.");
        describe_counter!("job_retries_total", "Transient-failure retries performed.");
        describe_counter!("reliability_sweeps_total", "Reliability scorer passes.");
        describe_counter!("logs_pruned_total", "Execution logs dropped by retention.");
        describe_histogram!("job_duration_seconds", "Wall time of one check attempt.");
        describe_gauge!("engine_last_sweep_ts", "Unix ts of the last dispatcher sweep.");
    });
}

/// Process-wide engine state, constructed explicitly and shared via `Arc`.
pub struct EngineContext {
    pub schedules: ScheduleStore,
    pub logs: LogStore,
    pub registry: JobRegistry,
    pub config: EngineConfig,
    workers: Arc<Semaphore>,
}

impl EngineContext {
    pub fn new(config: EngineConfig, registry: JobRegistry) -> Arc<Self> {
        ensure_metrics_described();
        let workers = Arc::new(Semaphore::new(config.worker_concurrency.max(1)));
        Arc::new(Self {
            schedules: ScheduleStore::new(),
            logs: LogStore::new(),
            registry,
            config,
            workers,
        })
    }
}

/// One sweep: plan dispatches, claim each record, and hand the job to the
/// worker pool. Returns the planning stats; job outcomes land in the
/// execution log.
pub fn run_sweep(ctx: &Arc<EngineContext>, factory: &Arc<dyn ConnectorFactory>) -> SweepStats {
    let now = Utc::now();
    let (stats, dispatches) = sweep(&ctx.schedules, &ctx.registry, now);
    counter!("sweep_runs_total").increment(1);
    gauge!("engine_last_sweep_ts").set(now.timestamp().max(0) as f64);

    for msg in dispatches {
        // The atomic guard right before dispatch: an overlapping sweep that
        // planned the same record loses the claim and moves on.
        if !ctx.schedules.claim_in_flight(msg.schedule_id) {
            tracing::debug!(
                schedule_id = msg.schedule_id,
                "lost in-flight claim, not dispatching"
            );
            continue;
        }

        let connector = match factory.build(msg.kind, &msg.extra_params) {
            Ok(c) => c,
            Err(e) => {
                ctx.schedules.release_in_flight(msg.schedule_id);
                tracing::warn!(kind = %msg.kind, error = %e, "connector construction failed");
                continue;
            }
        };

        let policy = ctx.config.policy_for(msg.kind.class());
        let ctx = Arc::clone(ctx);
        tokio::spawn(async move {
            let _permit = ctx
                .workers
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore closed");
            let outcome =
                run_with_retry(&ctx.schedules, &ctx.logs, &msg, connector.as_ref(), policy).await;
            tracing::debug!(schedule_id = msg.schedule_id, outcome = ?outcome, "job finished");
            ctx.schedules.release_in_flight(msg.schedule_id);
        });
    }

    stats
}

/// Periodic dispatcher sweep (outer cadence, e.g. every 6 hours).
pub fn spawn_sweep_loop(
    ctx: Arc<EngineContext>,
    factory: Arc<dyn ConnectorFactory>,
) -> JoinHandle<()> {
    let interval_secs = ctx.config.sweep_interval_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let stats = run_sweep(&ctx, &factory);
            tracing::info!(
                checked = stats.checked,
                scheduled = stats.scheduled,
                skipped = stats.skipped,
                errors = stats.errors,
                "sweep tick"
            );
        }
    })
}

/// Periodic reliability recomputation (e.g. weekly).
pub fn spawn_scorer_loop(ctx: Arc<EngineContext>) -> JoinHandle<()> {
    let interval_secs = ctx.config.scorer_interval_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let stats = score_sweep(&ctx.schedules, &ctx.logs);
            tracing::info!(
                updated = stats.updated,
                unchanged = stats.unchanged,
                "scorer tick"
            );
        }
    })
}

/// Periodic log retention pass.
pub fn spawn_prune_loop(ctx: Arc<EngineContext>) -> JoinHandle<()> {
    let interval_secs = ctx.config.prune_interval_secs;
    let retention_days = ctx.config.log_retention_days;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let pruned = ctx.logs.prune_older_than(Utc::now(), retention_days);
            counter!("logs_pruned_total").increment(pruned as u64);
            tracing::info!(pruned, retention_days, "log retention tick");
        }
    })
}

// src/store.rs
//! In-memory stores for schedule records, data sources, and execution logs.
//!
//! The storage engine itself is out of scope; these stand in with the schema
//! shape plus the locking semantics the engine relies on: every mutation of a
//! row runs as a closure under the store lock, so two writers against the
//! same record serialize instead of clobbering each other. The in-flight set
//! is the "running" guard checked atomically before dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::error::IngestError;
use crate::log::{ExecutionLog, LogStatus};
use crate::schedule::{DataSource, ScheduleRecord};

#[derive(Debug, Default)]
pub struct ScheduleStore {
    sources: Mutex<HashMap<u64, DataSource>>,
    records: Mutex<HashMap<u64, ScheduleRecord>>,
    in_flight: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert_source(&self, source: DataSource) {
        self.sources
            .lock()
            .expect("source map poisoned")
            .insert(source.id, source);
    }

    pub fn source(&self, id: u64) -> Option<DataSource> {
        self.sources.lock().expect("source map poisoned").get(&id).cloned()
    }

    pub fn insert(&self, record: ScheduleRecord) {
        self.records
            .lock()
            .expect("schedule map poisoned")
            .insert(record.id, record);
    }

    pub fn get(&self, id: u64) -> Option<ScheduleRecord> {
        self.records.lock().expect("schedule map poisoned").get(&id).cloned()
    }

    /// Snapshot of all records with auto-checking enabled.
    pub fn enabled_records(&self) -> Vec<ScheduleRecord> {
        let map = self.records.lock().expect("schedule map poisoned");
        let mut out: Vec<ScheduleRecord> =
            map.values().filter(|r| r.check_enabled).cloned().collect();
        out.sort_by_key(|r| r.id);
        out
    }

    /// Mutate one record under the store lock. The closure sees the current
    /// row, so a concurrent writer's result is observed, never clobbered.
    pub fn update<F, T>(&self, id: u64, f: F) -> Result<T, IngestError>
    where
        F: FnOnce(&mut ScheduleRecord) -> T,
    {
        let mut map = self.records.lock().expect("schedule map poisoned");
        match map.get_mut(&id) {
            Some(rec) => Ok(f(rec)),
            None => Err(IngestError::NotFound("schedule record", id)),
        }
    }

    /// Operator switch for auto-checking. Re-enabling clears the failure
    /// counter, the manual reset path out of the auto-disabled state.
    pub fn set_enabled(&self, id: u64, enabled: bool) -> Result<(), IngestError> {
        self.update(id, |rec| {
            rec.check_enabled = enabled;
            if enabled {
                rec.consecutive_failures = 0;
                rec.last_error = None;
            }
        })
    }

    /// Claim a record for execution. Returns false if an attempt is already
    /// in flight; at most one attempt per record at a time.
    pub fn claim_in_flight(&self, id: u64) -> bool {
        self.in_flight.lock().expect("in-flight set poisoned").insert(id)
    }

    pub fn release_in_flight(&self, id: u64) {
        self.in_flight.lock().expect("in-flight set poisoned").remove(&id);
    }

    pub fn is_in_flight(&self, id: u64) -> bool {
        self.in_flight.lock().expect("in-flight set poisoned").contains(&id)
    }
}

#[derive(Debug, Default)]
pub struct LogStore {
    logs: Mutex<Vec<ExecutionLog>>,
    next_id: AtomicU64,
}

impl LogStore {
    pub fn new() -> Self {
        Self {
            logs: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, log: ExecutionLog) {
        self.logs.lock().expect("log store poisoned").push(log);
    }

    pub fn get(&self, id: u64) -> Option<ExecutionLog> {
        self.logs
            .lock()
            .expect("log store poisoned")
            .iter()
            .find(|l| l.id == id)
            .cloned()
    }

    pub fn update<F, T>(&self, id: u64, f: F) -> Result<T, IngestError>
    where
        F: FnOnce(&mut ExecutionLog) -> T,
    {
        let mut logs = self.logs.lock().expect("log store poisoned");
        match logs.iter_mut().find(|l| l.id == id) {
            Some(log) => Ok(f(log)),
            None => Err(IngestError::NotFound("execution log", id)),
        }
    }

    /// Most recent `n` logs for one schedule, newest first.
    pub fn recent_for_schedule(&self, schedule_id: u64, n: usize) -> Vec<ExecutionLog> {
        let logs = self.logs.lock().expect("log store poisoned");
        let mut out: Vec<ExecutionLog> = logs
            .iter()
            .filter(|l| l.schedule_id == schedule_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out.truncate(n);
        out
    }

    pub fn all_for_schedule(&self, schedule_id: u64) -> Vec<ExecutionLog> {
        let logs = self.logs.lock().expect("log store poisoned");
        logs.iter().filter(|l| l.schedule_id == schedule_id).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.logs.lock().expect("log store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of logs stuck in a non-terminal state (should stay zero).
    pub fn non_terminal_count(&self) -> usize {
        let logs = self.logs.lock().expect("log store poisoned");
        logs.iter().filter(|l| !l.status.is_terminal()).count()
    }

    /// Drop logs older than the retention window. Returns how many were
    /// removed.
    pub fn prune_older_than(&self, now: DateTime<Utc>, retention_days: i64) -> usize {
        let cutoff = now - Duration::days(retention_days);
        let mut logs = self.logs.lock().expect("log store poisoned");
        let before = logs.len();
        logs.retain(|l| l.created_at >= cutoff);
        before - logs.len()
    }

    /// Count of logs per terminal status, for diagnostics.
    pub fn status_count(&self, status: LogStatus) -> usize {
        let logs = self.logs.lock().expect("log store poisoned");
        logs.iter().filter(|l| l.status == status).count()
    }
}

// src/connector.rs
//! The three-method contract every provider adapter implements, plus the
//! canonical checksum used for change detection.
//!
//! The core depends on nothing about a payload beyond this contract: fetch an
//! opaque JSON payload, transform it into records, load the records into the
//! target statistics store. Payloads must serialize deterministically for
//! checksumming, so connectors pre-sort any arrays they emit.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::dispatch::JobKind;
use crate::error::IngestError;
use crate::log::RecordCounts;

/// Opaque parameters forwarded from the dispatch message to the connector
/// constructor.
pub type ExtraParams = serde_json::Map<String, Value>;

/// Statistics reported by a connector's load step.
#[derive(Debug, Clone, Default)]
pub struct LoadStats {
    pub counts: RecordCounts,
    pub metadata: Value,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Fetch the raw upstream payload. The only network-bound step.
    async fn fetch(&self) -> Result<Value, IngestError>;

    /// Parse the raw payload into records ready for loading. Per-record
    /// validation failures belong in `load`'s skipped count, not here.
    fn transform(&self, raw: Value) -> Result<Vec<Value>, IngestError>;

    /// Persist records into the target statistics store.
    async fn load(&self, records: &[Value]) -> Result<LoadStats, IngestError>;

    fn name(&self) -> &'static str;
}

/// Builds a connector for a routed job. Implemented outside the core, one
/// arm per provider adapter.
pub trait ConnectorFactory: Send + Sync {
    fn build(
        &self,
        kind: JobKind,
        params: &ExtraParams,
    ) -> Result<Box<dyn Connector>, IngestError>;
}

/// SHA-256 hex fingerprint of a payload's canonical JSON form.
///
/// serde_json maps are BTree-backed by default, so object keys serialize
/// sorted; array order is the connector's responsibility.
pub fn checksum(payload: &Value) -> String {
    let canonical = payload.to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Fixture-backed connector for tests and local runs: the payload is an
/// in-memory JSON document and the target statistics store is a shared map.
/// Shows the intended shape of a provider adapter, including where the
/// quality fuser runs (inside `load`, per fact).
pub mod fixture {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::dispatch::JobKind;
    use crate::error::IngestError;
    use crate::log::RecordCounts;
    use crate::quality::{fuse, QualityTier, SourceValue};

    use super::{Connector, ConnectorFactory, ExtraParams, LoadStats};

    /// A fused statistic as persisted by the fixture connector.
    #[derive(Debug, Clone, PartialEq)]
    pub struct FusedStat {
        pub value: f64,
        pub score: f64,
        pub tier: QualityTier,
        pub num_sources: usize,
    }

    pub type StatsMap = Arc<Mutex<HashMap<String, FusedStat>>>;

    pub struct FixtureConnector {
        payload: Mutex<Value>,
        stats: StatsMap,
    }

    impl FixtureConnector {
        /// Expected payload shape:
        /// `{"facts": [{"fact": "...", "sources": [{"value": ..,
        /// "confidence": .., "weight": ..}, ..]}, ..]}`
        pub fn new(payload: Value, stats: StatsMap) -> Self {
            Self {
                payload: Mutex::new(payload),
                stats,
            }
        }

        /// Swap the upstream payload, simulating a provider update between
        /// runs.
        pub fn set_payload(&self, payload: Value) {
            *self.payload.lock().expect("fixture payload poisoned") = payload;
        }
    }

    #[async_trait]
    impl Connector for FixtureConnector {
        async fn fetch(&self) -> Result<Value, IngestError> {
            Ok(self.payload.lock().expect("fixture payload poisoned").clone())
        }

        fn transform(&self, raw: Value) -> Result<Vec<Value>, IngestError> {
            match raw.get("facts").and_then(Value::as_array) {
                Some(facts) => Ok(facts.clone()),
                None => Err(IngestError::Permanent(
                    "payload missing `facts` array".into(),
                )),
            }
        }

        async fn load(&self, records: &[Value]) -> Result<LoadStats, IngestError> {
            let mut counts = RecordCounts {
                fetched: records.len() as u64,
                ..Default::default()
            };
            let mut stats = self.stats.lock().expect("stats map poisoned");

            for record in records {
                let Some(fact) = record.get("fact").and_then(Value::as_str) else {
                    counts.skipped += 1;
                    continue;
                };
                let sources = parse_sources(record);
                if sources.is_empty() {
                    counts.skipped += 1;
                    continue;
                }

                let fusion = fuse(&sources);
                let fused = FusedStat {
                    value: fusion.final_value.unwrap_or_default(),
                    score: fusion.score,
                    tier: fusion.tier,
                    num_sources: fusion.num_sources,
                };

                match stats.get(fact) {
                    None => {
                        stats.insert(fact.to_string(), fused);
                        counts.added += 1;
                    }
                    Some(existing) if *existing != fused => {
                        stats.insert(fact.to_string(), fused);
                        counts.updated += 1;
                    }
                    Some(_) => counts.skipped += 1,
                }
            }

            Ok(LoadStats {
                counts,
                metadata: serde_json::json!({ "connector": self.name() }),
            })
        }

        fn name(&self) -> &'static str {
            "fixture"
        }
    }

    fn parse_sources(record: &Value) -> Vec<SourceValue> {
        record
            .get("sources")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|s| {
                        let value = s.get("value")?.as_f64()?;
                        Some(SourceValue {
                            value,
                            confidence: s
                                .get("confidence")
                                .and_then(Value::as_f64)
                                .unwrap_or(1.0),
                            weight: s.get("weight").and_then(Value::as_f64).unwrap_or(1.0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Factory handing every job kind the same fixture connector. Stands in
    /// until real provider adapters are registered.
    pub struct FixtureFactory {
        payload: Value,
        pub stats: StatsMap,
    }

    impl FixtureFactory {
        pub fn new(payload: Value) -> Self {
            Self {
                payload,
                stats: Arc::new(Mutex::new(HashMap::new())),
            }
        }
    }

    impl ConnectorFactory for FixtureFactory {
        fn build(
            &self,
            _kind: JobKind,
            _params: &ExtraParams,
        ) -> Result<Box<dyn Connector>, IngestError> {
            Ok(Box::new(FixtureConnector::new(
                self.payload.clone(),
                Arc::clone(&self.stats),
            )))
        }
    }
}

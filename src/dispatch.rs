// src/dispatch.rs
//! # Dispatcher
//! The periodic sweep that finds due schedule records and routes each to a
//! strongly-typed job descriptor.
//!
//! Routing is a static registry keyed by source name, validated at startup.
//! One disambiguation rule: the generically-named "World Bank" source is
//! routed by matching version-label substrings against an ordered list of
//! keyword groups. Unroutable combinations are logged and counted as
//! skipped; a routing error on one record never aborts the sweep.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;

use crate::connector::ExtraParams;
use crate::error::IngestError;
use crate::schedule::{DataSource, ScheduleRecord};
use crate::store::ScheduleStore;

/// Statistics vertical a job feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vertical {
    Agriculture,
    RealEstate,
    Employment,
    Business,
}

impl fmt::Display for Vertical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Vertical::Agriculture => "agriculture",
            Vertical::RealEstate => "realestate",
            Vertical::Employment => "employment",
            Vertical::Business => "business",
        };
        f.write_str(s)
    }
}

/// Strongly-typed job descriptor a schedule record routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    FaostatCrops,
    WorldBank(Vertical),
    SatelliteIndices,
    LocalSurveys(Vertical),
    OsmBuildings,
    CadastreParcels,
    PropertyListings,
    LandValuation,
    IlostatLabour,
    SectoralStats(Vertical),
    BusinessRegistry,
    Unido,
    TradeStatistics,
}

/// Category of job sharing one retry/delay/timeout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobClass {
    /// Structured provider APIs (FAOSTAT, World Bank, ILOSTAT, UNIDO).
    Api,
    /// Large extract downloads (OSM, satellite, trade statistics).
    Bulk,
    /// Scraped or manually-published sources.
    Scrape,
}

impl JobKind {
    pub fn class(self) -> JobClass {
        match self {
            JobKind::FaostatCrops
            | JobKind::WorldBank(_)
            | JobKind::IlostatLabour
            | JobKind::Unido => JobClass::Api,
            JobKind::OsmBuildings | JobKind::SatelliteIndices | JobKind::TradeStatistics => {
                JobClass::Bulk
            }
            JobKind::CadastreParcels
            | JobKind::PropertyListings
            | JobKind::LandValuation
            | JobKind::LocalSurveys(_)
            | JobKind::SectoralStats(_)
            | JobKind::BusinessRegistry => JobClass::Scrape,
        }
    }

    pub fn as_slug(self) -> &'static str {
        match self {
            JobKind::FaostatCrops => "faostat_crops",
            JobKind::WorldBank(Vertical::Agriculture) => "world_bank_agriculture",
            JobKind::WorldBank(Vertical::Employment) => "world_bank_employment",
            JobKind::WorldBank(Vertical::Business) => "world_bank_business",
            JobKind::WorldBank(Vertical::RealEstate) => "world_bank_realestate",
            JobKind::SatelliteIndices => "satellite_indices",
            JobKind::LocalSurveys(Vertical::Agriculture) => "local_surveys_agriculture",
            JobKind::LocalSurveys(Vertical::Employment) => "local_surveys_employment",
            JobKind::LocalSurveys(Vertical::RealEstate) => "local_surveys_realestate",
            JobKind::LocalSurveys(Vertical::Business) => "local_surveys_business",
            JobKind::OsmBuildings => "osm_buildings",
            JobKind::CadastreParcels => "cadastre_parcels",
            JobKind::PropertyListings => "property_listings",
            JobKind::LandValuation => "land_valuation",
            JobKind::IlostatLabour => "ilostat_labour",
            JobKind::SectoralStats(Vertical::Employment) => "sectoral_employment",
            JobKind::SectoralStats(Vertical::Business) => "sectoral_business",
            JobKind::SectoralStats(Vertical::Agriculture) => "sectoral_agriculture",
            JobKind::SectoralStats(Vertical::RealEstate) => "sectoral_realestate",
            JobKind::BusinessRegistry => "business_registry",
            JobKind::Unido => "unido",
            JobKind::TradeStatistics => "trade_statistics",
        }
    }
}

impl FromStr for JobKind {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "faostat_crops" => JobKind::FaostatCrops,
            "world_bank_agriculture" => JobKind::WorldBank(Vertical::Agriculture),
            "world_bank_employment" => JobKind::WorldBank(Vertical::Employment),
            "world_bank_business" => JobKind::WorldBank(Vertical::Business),
            "world_bank_realestate" => JobKind::WorldBank(Vertical::RealEstate),
            "satellite_indices" => JobKind::SatelliteIndices,
            "local_surveys_agriculture" => JobKind::LocalSurveys(Vertical::Agriculture),
            "local_surveys_employment" => JobKind::LocalSurveys(Vertical::Employment),
            "local_surveys_realestate" => JobKind::LocalSurveys(Vertical::RealEstate),
            "local_surveys_business" => JobKind::LocalSurveys(Vertical::Business),
            "osm_buildings" => JobKind::OsmBuildings,
            "cadastre_parcels" => JobKind::CadastreParcels,
            "property_listings" => JobKind::PropertyListings,
            "land_valuation" => JobKind::LandValuation,
            "ilostat_labour" => JobKind::IlostatLabour,
            "sectoral_employment" => JobKind::SectoralStats(Vertical::Employment),
            "sectoral_business" => JobKind::SectoralStats(Vertical::Business),
            "sectoral_agriculture" => JobKind::SectoralStats(Vertical::Agriculture),
            "sectoral_realestate" => JobKind::SectoralStats(Vertical::RealEstate),
            "business_registry" => JobKind::BusinessRegistry,
            "unido" => JobKind::Unido,
            "trade_statistics" => JobKind::TradeStatistics,
            other => return Err(IngestError::Route(format!("unknown job kind `{other}`"))),
        };
        Ok(kind)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_slug())
    }
}

/// What the dispatcher hands to a worker: identifiers only, no live object
/// references, so the job runs in an independent execution context.
#[derive(Debug, Clone)]
pub struct DispatchMessage {
    pub schedule_id: u64,
    pub data_source_id: u64,
    pub kind: JobKind,
    pub extra_params: ExtraParams,
}

/// Outcome of one dispatcher sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub checked: u64,
    pub scheduled: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Routing seam. The engine ships `JobRegistry`; tests can substitute a
/// failing router to exercise per-record error isolation.
pub trait JobRouter: Send + Sync {
    /// `Ok(None)` means no job type matches (counted as skipped).
    fn resolve(
        &self,
        source: &DataSource,
        version: &str,
    ) -> Result<Option<JobKind>, IngestError>;
}

/// Raw registry configuration, loadable from the engine config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    /// Exact source-name → job-kind-slug entries.
    #[serde(default)]
    pub sources: HashMap<String, String>,
    /// The generically-named source disambiguated by version keywords.
    #[serde(default)]
    pub generic_source: Option<String>,
    /// Ordered keyword groups: first group with a substring hit wins.
    #[serde(default)]
    pub keyword_groups: Vec<KeywordGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeywordGroup {
    pub keywords: Vec<String>,
    pub kind: String,
}

/// Typed routing table keyed by lowercase source name.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    exact: HashMap<String, JobKind>,
    generic_source: Option<String>,
    keyword_groups: Vec<(Vec<String>, JobKind)>,
}

impl JobRegistry {
    /// Built-in mapping covering the four verticals. Used when the config
    /// file carries no registry section.
    pub fn default_seed() -> Self {
        let mut exact = HashMap::new();
        for (name, kind) in [
            // Agriculture
            ("faostat", JobKind::FaostatCrops),
            ("world_bank_agriculture", JobKind::WorldBank(Vertical::Agriculture)),
            ("copernicus_satellite", JobKind::SatelliteIndices),
            ("instad_agriculture", JobKind::LocalSurveys(Vertical::Agriculture)),
            // Real estate
            ("openstreetmap", JobKind::OsmBuildings),
            ("cadastre_benin", JobKind::CadastreParcels),
            ("property_listings", JobKind::PropertyListings),
            ("land_valuation", JobKind::LandValuation),
            // Employment
            ("ilostat", JobKind::IlostatLabour),
            ("world_bank_employment", JobKind::WorldBank(Vertical::Employment)),
            ("instad_employment", JobKind::LocalSurveys(Vertical::Employment)),
            ("sectoral_employment", JobKind::SectoralStats(Vertical::Employment)),
            // Business
            ("rccm_benin", JobKind::BusinessRegistry),
            ("world_bank_business", JobKind::WorldBank(Vertical::Business)),
            ("unido", JobKind::Unido),
            ("sectoral_business", JobKind::SectoralStats(Vertical::Business)),
            ("trade_statistics", JobKind::TradeStatistics),
        ] {
            exact.insert(name.to_string(), kind);
        }

        let keyword_groups = vec![
            (
                vec!["agriculture".to_string(), "agric".to_string()],
                JobKind::WorldBank(Vertical::Agriculture),
            ),
            (
                vec!["employment".to_string(), "labor".to_string(), "labour".to_string()],
                JobKind::WorldBank(Vertical::Employment),
            ),
            (
                vec!["business".to_string(), "enterprise".to_string()],
                JobKind::WorldBank(Vertical::Business),
            ),
        ];

        Self {
            exact,
            generic_source: Some("world bank".to_string()),
            keyword_groups,
        }
    }

    /// Build a registry from raw config, parsing every slug. Fails fast so a
    /// typo surfaces at startup rather than as silently-dropped dispatches.
    pub fn from_config(cfg: &RegistryConfig) -> Result<Self, IngestError> {
        let mut exact = HashMap::new();
        for (name, slug) in &cfg.sources {
            let kind = JobKind::from_str(slug)?;
            exact.insert(name.to_ascii_lowercase(), kind);
        }
        let mut keyword_groups = Vec::new();
        for group in &cfg.keyword_groups {
            let kind = JobKind::from_str(&group.kind)?;
            keyword_groups.push((
                group.keywords.iter().map(|k| k.to_ascii_lowercase()).collect(),
                kind,
            ));
        }
        let registry = Self {
            exact,
            generic_source: cfg.generic_source.as_ref().map(|s| s.to_ascii_lowercase()),
            keyword_groups,
        };
        registry.validate()?;
        Ok(registry)
    }

    /// Structural checks run at startup.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.exact.is_empty() {
            return Err(IngestError::Route("registry has no source entries".into()));
        }
        if self.generic_source.is_some() && self.keyword_groups.is_empty() {
            return Err(IngestError::Route(
                "generic source configured without keyword groups".into(),
            ));
        }
        for (keywords, kind) in &self.keyword_groups {
            if keywords.is_empty() {
                return Err(IngestError::Route(format!(
                    "empty keyword group for job kind `{kind}`"
                )));
            }
        }
        Ok(())
    }
}

impl JobRouter for JobRegistry {
    fn resolve(
        &self,
        source: &DataSource,
        version: &str,
    ) -> Result<Option<JobKind>, IngestError> {
        let source_name = source.name.to_ascii_lowercase();

        // Generic source: route by version-label keywords, first group wins.
        if self.generic_source.as_deref() == Some(source_name.as_str()) {
            let version = version.to_ascii_lowercase();
            for (keywords, kind) in &self.keyword_groups {
                if keywords.iter().any(|k| version.contains(k.as_str())) {
                    return Ok(Some(*kind));
                }
            }
            return Ok(None);
        }

        Ok(self.exact.get(&source_name).copied())
    }
}

/// One dispatcher pass over all enabled schedule records.
///
/// Returns the sweep stats plus the dispatch messages for due, routable
/// records. The caller enqueues the messages onto the worker pool. Failure
/// on one record is isolated; the sweep never aborts early, and
/// `checked == scheduled + skipped + errors` always holds.
pub fn sweep(
    store: &ScheduleStore,
    router: &dyn JobRouter,
    now: DateTime<Utc>,
) -> (SweepStats, Vec<DispatchMessage>) {
    let mut stats = SweepStats::default();
    let mut dispatches = Vec::new();

    for record in store.enabled_records() {
        stats.checked += 1;

        match evaluate_record(store, router, &record, now) {
            Ok(Some(msg)) => {
                stats.scheduled += 1;
                tracing::info!(
                    schedule_id = msg.schedule_id,
                    kind = %msg.kind,
                    "scheduled ingestion"
                );
                dispatches.push(msg);
            }
            Ok(None) => stats.skipped += 1,
            Err(e) => {
                stats.errors += 1;
                counter!("sweep_record_errors_total").increment(1);
                tracing::warn!(schedule_id = record.id, error = %e, "sweep record error");
            }
        }
    }

    tracing::info!(
        checked = stats.checked,
        scheduled = stats.scheduled,
        skipped = stats.skipped,
        errors = stats.errors,
        "dispatcher sweep complete"
    );
    (stats, dispatches)
}

fn evaluate_record(
    store: &ScheduleStore,
    router: &dyn JobRouter,
    record: &ScheduleRecord,
    now: DateTime<Utc>,
) -> Result<Option<DispatchMessage>, IngestError> {
    if !record.should_check(now) {
        return Ok(None);
    }

    // A still-running attempt keeps the record out of this sweep.
    if store.is_in_flight(record.id) {
        tracing::debug!(schedule_id = record.id, "attempt already in flight");
        return Ok(None);
    }

    let source = match store.source(record.data_source_id) {
        Some(s) if s.is_active => s,
        Some(_) | None => return Ok(None),
    };

    match router.resolve(&source, &record.version)? {
        Some(kind) => Ok(Some(DispatchMessage {
            schedule_id: record.id,
            data_source_id: source.id,
            kind,
            extra_params: ExtraParams::new(),
        })),
        None => {
            // Unroutable source/version: observable but not fatal.
            counter!("sweep_unroutable_total").increment(1);
            tracing::warn!(
                source = %source.name,
                version = %record.version,
                "no job type matches source/version, skipping"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Cadence;

    fn source(name: &str) -> DataSource {
        DataSource::new(1, name, Some(Cadence::Monthly))
    }

    #[test]
    fn seed_registry_validates() {
        JobRegistry::default_seed().validate().unwrap();
    }

    #[test]
    fn exact_name_routes_case_insensitively() {
        let reg = JobRegistry::default_seed();
        let kind = reg.resolve(&source("FAOSTAT"), "production-2025").unwrap();
        assert_eq!(kind, Some(JobKind::FaostatCrops));
    }

    #[test]
    fn generic_source_routes_by_version_keywords() {
        let reg = JobRegistry::default_seed();
        let wb = source("World Bank");
        assert_eq!(
            reg.resolve(&wb, "agric-indicators-2025").unwrap(),
            Some(JobKind::WorldBank(Vertical::Agriculture))
        );
        assert_eq!(
            reg.resolve(&wb, "labour-force-q3").unwrap(),
            Some(JobKind::WorldBank(Vertical::Employment))
        );
        assert_eq!(
            reg.resolve(&wb, "enterprise-survey").unwrap(),
            Some(JobKind::WorldBank(Vertical::Business))
        );
        assert_eq!(reg.resolve(&wb, "health-spending").unwrap(), None);
    }

    #[test]
    fn unknown_source_is_unroutable() {
        let reg = JobRegistry::default_seed();
        assert_eq!(reg.resolve(&source("mystery_feed"), "v1").unwrap(), None);
    }

    #[test]
    fn config_with_bad_slug_fails_at_startup() {
        let mut cfg = RegistryConfig::default();
        cfg.sources.insert("faostat".into(), "not_a_kind".into());
        assert!(JobRegistry::from_config(&cfg).is_err());
    }

    #[test]
    fn empty_keyword_group_is_rejected() {
        let reg = JobRegistry {
            exact: HashMap::from([("faostat".to_string(), JobKind::FaostatCrops)]),
            generic_source: Some("world bank".into()),
            keyword_groups: vec![(Vec::new(), JobKind::WorldBank(Vertical::Agriculture))],
        };
        assert!(reg.validate().is_err());
    }

    #[test]
    fn job_class_mapping_is_total() {
        // Spot checks; the match in `class` is exhaustive by construction.
        assert_eq!(JobKind::FaostatCrops.class(), JobClass::Api);
        assert_eq!(JobKind::OsmBuildings.class(), JobClass::Bulk);
        assert_eq!(JobKind::CadastreParcels.class(), JobClass::Scrape);
    }

    #[test]
    fn slug_round_trip() {
        for kind in [
            JobKind::FaostatCrops,
            JobKind::WorldBank(Vertical::Employment),
            JobKind::SectoralStats(Vertical::Business),
            JobKind::TradeStatistics,
        ] {
            assert_eq!(JobKind::from_str(kind.as_slug()).unwrap(), kind);
        }
    }
}

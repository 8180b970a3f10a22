// src/config.rs
//! Engine configuration. Supports TOML or JSON files with an env-var path
//! override and built-in defaults, so a bare process still runs.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::dispatch::{JobClass, RegistryConfig};
use crate::job::RetryPolicy;

const ENV_PATH: &str = "STATFUSE_CONFIG_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Outer dispatcher cadence.
    pub sweep_interval_secs: u64,
    /// Reliability scorer cadence.
    pub scorer_interval_secs: u64,
    /// Log retention pass cadence.
    pub prune_interval_secs: u64,
    /// Execution logs older than this are pruned.
    pub log_retention_days: i64,
    /// Maximum concurrently running jobs.
    pub worker_concurrency: usize,

    pub api_policy: RetryPolicy,
    pub bulk_policy: RetryPolicy,
    pub scrape_policy: RetryPolicy,

    /// Optional routing-table override; the built-in seed applies when
    /// absent.
    pub registry: Option<RegistryConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 6 * 3600,
            scorer_interval_secs: 7 * 24 * 3600,
            prune_interval_secs: 24 * 3600,
            log_retention_days: 90,
            worker_concurrency: 4,
            api_policy: RetryPolicy {
                max_attempts: 3,
                delay_secs: 30,
                timeout_secs: 300,
            },
            bulk_policy: RetryPolicy {
                max_attempts: 2,
                delay_secs: 120,
                timeout_secs: 1800,
            },
            scrape_policy: RetryPolicy {
                max_attempts: 2,
                delay_secs: 60,
                timeout_secs: 600,
            },
            registry: None,
        }
    }
}

impl EngineConfig {
    pub fn policy_for(&self, class: JobClass) -> RetryPolicy {
        match class {
            JobClass::Api => self.api_policy,
            JobClass::Bulk => self.bulk_policy,
            JobClass::Scrape => self.scrape_policy,
        }
    }

    /// Load from an explicit path. TOML or JSON, by extension then content.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        parse_config(&content, ext.as_str())
    }

    /// Load using env var + fallbacks:
    /// 1) $STATFUSE_CONFIG_PATH
    /// 2) config/statfuse.toml
    /// 3) config/statfuse.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("STATFUSE_CONFIG_PATH points to non-existent path"));
            }
        }
        let toml_p = PathBuf::from("config/statfuse.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/statfuse.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default())
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<EngineConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing JSON engine config");
    }
    if let Ok(cfg) = toml::from_str::<EngineConfig>(s) {
        return Ok(cfg);
    }
    // Not valid TOML; last chance as JSON.
    serde_json::from_str(s).context("unsupported engine config format")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.sweep_interval_secs, 21_600);
        assert_eq!(cfg.log_retention_days, 90);
        assert_eq!(cfg.policy_for(JobClass::Api).max_attempts, 3);
        assert_eq!(cfg.policy_for(JobClass::Bulk).timeout_secs, 1800);
    }

    #[test]
    fn toml_overrides_only_named_fields() {
        let cfg = parse_config(
            r#"
            sweep_interval_secs = 600
            [api_policy]
            max_attempts = 5
            delay_secs = 1
            timeout_secs = 10
            "#,
            "toml",
        )
        .unwrap();
        assert_eq!(cfg.sweep_interval_secs, 600);
        assert_eq!(cfg.api_policy.max_attempts, 5);
        // Untouched fields keep defaults.
        assert_eq!(cfg.log_retention_days, 90);
    }

    #[test]
    fn json_config_parses() {
        let cfg = parse_config(r#"{"worker_concurrency": 2}"#, "json").unwrap();
        assert_eq!(cfg.worker_concurrency, 2);
    }

    #[test]
    fn registry_section_is_optional() {
        let cfg = parse_config(
            r#"
            [registry]
            generic_source = "world bank"
            [registry.sources]
            faostat = "faostat_crops"
            [[registry.keyword_groups]]
            keywords = ["agric"]
            kind = "world_bank_agriculture"
            "#,
            "toml",
        )
        .unwrap();
        let reg = cfg.registry.unwrap();
        assert_eq!(reg.sources["faostat"], "faostat_crops");
        assert_eq!(reg.keyword_groups.len(), 1);
    }

    #[serial_test::serial]
    #[test]
    fn default_load_uses_env_then_fallbacks() {
        // Isolate CWD so a real config/ in the repo does not interfere.
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();

        env::remove_var(ENV_PATH);

        let cfg = EngineConfig::load_default().unwrap();
        assert_eq!(cfg.sweep_interval_secs, EngineConfig::default().sweep_interval_secs);

        let p_json = tmp.path().join("engine.json");
        fs::write(&p_json, r#"{"sweep_interval_secs": 123}"#).unwrap();
        env::set_var(ENV_PATH, p_json.display().to_string());
        let cfg2 = EngineConfig::load_default().unwrap();
        assert_eq!(cfg2.sweep_interval_secs, 123);
        env::remove_var(ENV_PATH);

        env::set_current_dir(&old).unwrap();
    }
}

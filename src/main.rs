// src/main.rs
//! Ingestion engine binary entrypoint.
//! Loads the engine config, validates the routing registry, starts the
//! dispatcher/scorer/prune loops, and serves /metrics and /health.
//!
//! Provider adapters are wired through a `ConnectorFactory`; until real
//! adapters are registered this binary runs with the fixture factory so the
//! whole pipeline can be exercised locally.

use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use statfuse::config::EngineConfig;
use statfuse::connector::fixture::FixtureFactory;
use statfuse::connector::ConnectorFactory;
use statfuse::dispatch::JobRegistry;
use statfuse::engine::{spawn_prune_loop, spawn_scorer_loop, spawn_sweep_loop, EngineContext};
use statfuse::metrics::Metrics;
use statfuse::schedule::{Cadence, DataSource, ScheduleRecord};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("statfuse=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

/// Seed a couple of tracked datasets so a fresh local run has something to
/// sweep. Real deployments create these rows at setup time.
fn seed_demo_schedules(ctx: &EngineContext) {
    let sources = [
        DataSource::new(1, "faostat", Some(Cadence::Annual)),
        DataSource::new(2, "World Bank", Some(Cadence::Quarterly)),
        DataSource::new(3, "openstreetmap", Some(Cadence::Monthly)),
    ];
    let records = [
        ScheduleRecord::new(1, 1, "crop-production-2025"),
        ScheduleRecord::new(2, 2, "agric-indicators-2025"),
        ScheduleRecord::new(3, 3, "buildings-extract-q3"),
    ];
    for s in sources {
        ctx.schedules.insert_source(s);
    }
    for r in records {
        ctx.schedules.insert(r);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = EngineConfig::load_default().context("loading engine config")?;

    let registry = match &config.registry {
        Some(raw) => JobRegistry::from_config(raw).context("building job registry")?,
        None => JobRegistry::default_seed(),
    };
    registry.validate().context("validating job registry")?;

    let metrics = Metrics::init(config.sweep_interval_secs);
    let router = metrics.router();

    let ctx = EngineContext::new(config, registry);
    seed_demo_schedules(&ctx);

    let factory: Arc<dyn ConnectorFactory> = Arc::new(FixtureFactory::new(json!({
        "facts": [
            {
                "fact": "maize_production_tonnes",
                "sources": [
                    {"value": 1_520_000.0, "confidence": 0.95, "weight": 1.0},
                    {"value": 1_490_000.0, "confidence": 0.90, "weight": 0.8}
                ]
            }
        ]
    })));

    let sweep_handle = spawn_sweep_loop(Arc::clone(&ctx), factory);
    let scorer_handle = spawn_scorer_loop(Arc::clone(&ctx));
    let prune_handle = spawn_prune_loop(Arc::clone(&ctx));
    tracing::info!("engine loops started");

    let addr = std::env::var("STATFUSE_METRICS_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:9184".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding metrics listener on {addr}"))?;
    tracing::info!(%addr, "metrics server listening");

    tokio::select! {
        res = axum::serve(listener, router).into_future() => res.context("metrics server")?,
        _ = sweep_handle => {},
        _ = scorer_handle => {},
        _ = prune_handle => {},
    }

    Ok(())
}

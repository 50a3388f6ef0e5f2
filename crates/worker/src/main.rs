use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use climate_durable::prelude::*;
use climate_worker::telemetry::{init_telemetry, TelemetryConfig};
use climate_worker::{register_modules, WorkerConfig};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Runs the climate data collection modules on a fixed cycle
#[derive(Debug, Parser)]
#[command(name = "climate-worker", version, about)]
struct Args {
    /// Directory holding module checkpoints
    #[arg(long, env = "CHECKPOINT_DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Directory holding module YAML configs
    #[arg(long, env = "MODULE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Seconds between cycles
    #[arg(long, env = "CYCLE_INTERVAL_SECS")]
    interval_secs: Option<u64>,

    /// Cancel modules still running after this many seconds
    #[arg(long, env = "CYCLE_TIME_LIMIT_SECS")]
    time_limit_secs: Option<u64>,

    /// Only run the named module (repeatable)
    #[arg(long = "module")]
    modules: Vec<String>,

    /// JSON array of location documents loaded into the store at startup
    #[arg(long, env = "SEED_LOCATIONS")]
    seed_locations: Option<PathBuf>,
}

impl Args {
    fn worker_config(&self) -> WorkerConfig {
        let mut config = WorkerConfig::from_env();
        if let Some(dir) = &self.checkpoint_dir {
            config.checkpoint_dir = dir.clone();
        }
        if let Some(dir) = &self.config_dir {
            config.config_dir = dir.clone();
        }
        if let Some(secs) = self.interval_secs {
            config.cycle_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.time_limit_secs {
            config.cycle_time_limit = Some(Duration::from_secs(secs));
        }
        config
    }
}

/// Insert the locations listed in `path`, keyed by their `_id`
async fn seed_locations(store: &dyn DocumentStore, path: &Path) -> Result<u64> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let locations: Vec<Value> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    let mut items = Vec::with_capacity(locations.len());
    for location in locations {
        let Value::Object(document) = location else {
            bail!("{} must contain an array of objects", path.display());
        };
        let Some(id) = document.get("_id").and_then(Value::as_i64) else {
            bail!("location without an integer _id in {}", path.display());
        };
        items.push((NaturalKey::new().with("_id", id), document));
    }
    let counts = store.bulk_upsert("locations", items).await?;
    Ok(counts.upserted)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_telemetry(TelemetryConfig::from_env());

    let config = args.worker_config();
    tracing::info!(
        checkpoint_dir = %config.checkpoint_dir.display(),
        config_dir = %config.config_dir.display(),
        interval_secs = config.cycle_interval.as_secs(),
        once = args.once,
        "climate-worker starting..."
    );

    std::fs::create_dir_all(&config.checkpoint_dir).with_context(|| {
        format!(
            "failed to create checkpoint directory {}",
            config.checkpoint_dir.display()
        )
    })?;

    let documents: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    if let Some(path) = &args.seed_locations {
        let seeded = seed_locations(documents.as_ref(), path).await?;
        tracing::info!(seeded, path = %path.display(), "seeded locations");
    }

    let mut registry = ModuleRegistry::new();
    register_modules(&mut registry, config.config_dir.clone())
        .context("failed to register modules")?;
    if !args.modules.is_empty() {
        registry
            .retain(&args.modules)
            .context("unknown module requested")?;
    }

    let checkpoints = FileCheckpointStore::new(&config.checkpoint_dir);
    let resumed: Vec<String> = checkpoints
        .stored_modules()
        .await
        .context("failed to list checkpoints")?
        .into_iter()
        .filter(|module| registry.contains(module))
        .collect();
    if !resumed.is_empty() {
        tracing::warn!(
            modules = ?resumed,
            checkpoint_dir = %config.checkpoint_dir.display(),
            "resuming checkpoints while documents are kept in memory; data stored before this start is gone"
        );
    }

    let shutdown = CancellationToken::new();
    let env = ModuleEnv::new(Arc::new(checkpoints), documents)
        .with_cancellation(shutdown.clone());

    let mut coordinator_config = CoordinatorConfig::default();
    if let Some(limit) = config.cycle_time_limit {
        coordinator_config = coordinator_config.with_time_limit(limit);
    }
    let coordinator = Coordinator::new(registry, env).with_config(coordinator_config);

    loop {
        let cycle = coordinator.run_cycle();
        tokio::pin!(cycle);
        let report = tokio::select! {
            report = &mut cycle => report,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, waiting for modules to stop");
                shutdown.cancel();
                cycle.await;
                break;
            }
        };

        if args.once {
            if report.unsuccessful() > 0 {
                tracing::warn!(
                    unsuccessful = report.unsuccessful(),
                    "cycle finished with unsuccessful modules"
                );
            }
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(config.cycle_interval) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}

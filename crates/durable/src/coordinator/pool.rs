//! Cycle coordinator
//!
//! Runs every registered module concurrently once per cycle, optionally
//! under a time limit, and collects the outcome through the supervisor.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::registry::{ModuleEnv, ModuleRegistry, RegistryError};
use super::supervisor::{ExecutionReport, Supervisor, SupervisorMessage};
use crate::checkpoint::ErrorInfo;
use crate::engine::RunSummary;

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Cancel runners that are still busy after this long
    pub time_limit: Option<Duration>,

    /// Supervisor channel capacity
    pub channel_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            time_limit: None,
            channel_capacity: 64,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }
}

/// Runs one cycle of all registered modules
///
/// # Example
///
/// ```ignore
/// let env = ModuleEnv::new(checkpoints, documents).with_cancellation(shutdown.clone());
/// let coordinator = Coordinator::new(registry, env)
///     .with_config(CoordinatorConfig::default().with_time_limit(Duration::from_secs(3600)));
///
/// let report = coordinator.run_cycle().await;
/// info!(successful = report.successful(), "cycle done");
/// ```
pub struct Coordinator {
    registry: Arc<ModuleRegistry>,
    env: ModuleEnv,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(registry: ModuleRegistry, env: ModuleEnv) -> Self {
        Self {
            registry: Arc::new(registry),
            env,
            config: CoordinatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run every module once and return the cycle report
    ///
    /// Each module runs on its own task with a fresh runner. Runners still
    /// busy when the time limit expires are cancelled and awaited, so they
    /// stop at their next cancellation check and still write a checkpoint.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> ExecutionReport {
        let cycle_id = Uuid::now_v7();
        let cancel = self.env.cancel.child_token();
        let env = self.env.clone().with_cancellation(cancel.clone());
        let (tx, supervisor) = Supervisor::spawn(cycle_id, self.config.channel_capacity);

        info!(
            cycle_id = %cycle_id,
            modules = self.registry.len(),
            time_limit_secs = ?self.config.time_limit.map(|l| l.as_secs()),
            "starting cycle"
        );

        let mut handles = Vec::with_capacity(self.registry.len());
        for name in self.registry.names() {
            match self.registry.create(name, &env) {
                Ok(mut module) => {
                    let tx = tx.clone();
                    handles.push(tokio::spawn(async move {
                        let module_name = module.name().to_string();
                        let _ = tx
                            .send(SupervisorMessage::Register {
                                module: module_name,
                            })
                            .await;
                        let summary = module.run().await;
                        let _ = tx.send(SupervisorMessage::Finished(Box::new(summary))).await;
                    }));
                }
                Err(e) => {
                    error!(module = name, error = %e, "could not build module");
                    let info = match &e {
                        RegistryError::Construction { source, .. } => source.to_info(),
                        other => ErrorInfo::new("RegistryError", other.to_string()),
                    };
                    let summary = RunSummary::not_started(name, info);
                    let _ = tx.send(SupervisorMessage::Finished(Box::new(summary))).await;
                }
            }
        }

        let runners = join_all(handles);
        tokio::pin!(runners);

        let timed_out = match self.config.time_limit {
            Some(limit) => match tokio::time::timeout(limit, runners.as_mut()).await {
                Ok(results) => {
                    log_panics(results);
                    false
                }
                Err(_) => {
                    warn!(
                        cycle_id = %cycle_id,
                        limit_secs = limit.as_secs(),
                        "cycle time limit reached, cancelling runners"
                    );
                    cancel.cancel();
                    log_panics(runners.await);
                    true
                }
            },
            None => {
                log_panics(runners.await);
                false
            }
        };

        let _ = tx.send(SupervisorMessage::Report).await;
        let _ = tx.send(SupervisorMessage::Exit { timed_out }).await;
        drop(tx);

        match supervisor.await {
            Ok(report) => report,
            Err(e) => {
                error!(cycle_id = %cycle_id, error = %e, "supervisor task failed");
                let mut report = ExecutionReport::new(cycle_id);
                report.timed_out = timed_out;
                report
            }
        }
    }
}

fn log_panics(results: Vec<Result<(), tokio::task::JoinError>>) {
    for result in results {
        if let Err(e) = result {
            error!(error = %e, "module task panicked");
        }
    }
}

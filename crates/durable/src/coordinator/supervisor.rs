//! Cycle supervisor
//!
//! Runners report to the supervisor over an mpsc channel instead of
//! sharing a mutable report. The supervisor owns the cycle's
//! [`ExecutionReport`] and hands it back once `Exit` arrives.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checkpoint::ErrorInfo;
use crate::engine::RunSummary;
use crate::lifecycle::{ExecutionState, Verification};

/// Messages accepted by the supervisor
#[derive(Debug)]
pub enum SupervisorMessage {
    /// A module is about to run
    Register { module: String },
    /// A module reached a terminal state
    Finished(Box<RunSummary>),
    /// Log the report as it stands
    Report,
    /// Stop and return the report
    Exit { timed_out: bool },
}

/// Per-module line of the cycle report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleReport {
    pub module: String,
    /// `None` while the module is still running
    pub final_state: Option<ExecutionState>,
    pub transitions: Vec<ExecutionState>,
    pub verification: Option<Verification>,
    pub error: Option<ErrorInfo>,
    pub data_elements: Option<u64>,
    pub inserted_elements: Option<u64>,
    #[serde(with = "crate::reliability::duration_millis")]
    pub elapsed: Duration,
}

impl ModuleReport {
    fn registered(module: String) -> Self {
        Self {
            module,
            final_state: None,
            transitions: Vec::new(),
            verification: None,
            error: None,
            data_elements: None,
            inserted_elements: None,
            elapsed: Duration::ZERO,
        }
    }

    fn from_summary(summary: RunSummary) -> Self {
        Self {
            module: summary.module,
            final_state: Some(summary.final_state),
            transitions: summary.transitions,
            verification: summary.verification,
            error: summary.error,
            data_elements: summary.data_elements,
            inserted_elements: summary.inserted_elements,
            elapsed: summary.elapsed,
        }
    }

    pub fn successful(&self) -> bool {
        self.final_state == Some(ExecutionState::Finished)
            && self
                .verification
                .as_ref()
                .is_some_and(Verification::is_successful)
    }

    pub fn aborted(&self) -> bool {
        self.final_state == Some(ExecutionState::Aborted)
    }
}

/// Outcome of one coordinator cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub cycle_id: Uuid,
    pub cycle_started: DateTime<Utc>,
    #[serde(with = "crate::reliability::duration_millis")]
    pub duration: Duration,
    pub timed_out: bool,
    pub modules: Vec<ModuleReport>,
}

impl ExecutionReport {
    pub(crate) fn new(cycle_id: Uuid) -> Self {
        Self {
            cycle_id,
            cycle_started: Utc::now(),
            duration: Duration::ZERO,
            timed_out: false,
            modules: Vec::new(),
        }
    }

    pub fn module(&self, name: &str) -> Option<&ModuleReport> {
        self.modules.iter().find(|m| m.module == name)
    }

    pub fn successful(&self) -> usize {
        self.modules.iter().filter(|m| m.successful()).count()
    }

    /// Finished but not verified as successful
    pub fn unsuccessful(&self) -> usize {
        self.modules
            .iter()
            .filter(|m| m.final_state == Some(ExecutionState::Finished) && !m.successful())
            .count()
    }

    pub fn aborted(&self) -> usize {
        self.modules.iter().filter(|m| m.aborted()).count()
    }

    /// Still running when the report was taken
    pub fn unfinished(&self) -> usize {
        self.modules.iter().filter(|m| m.final_state.is_none()).count()
    }

    /// Error classes and how many modules ended with each
    pub fn error_classes(&self) -> BTreeMap<String, usize> {
        let mut classes = BTreeMap::new();
        for error in self.modules.iter().filter_map(|m| m.error.as_ref()) {
            *classes.entry(error.class.clone()).or_insert(0) += 1;
        }
        classes
    }

    fn record(&mut self, report: ModuleReport) {
        match self.modules.iter_mut().find(|m| m.module == report.module) {
            Some(existing) => *existing = report,
            None => self.modules.push(report),
        }
    }
}

/// Owns the cycle report and consumes runner messages
pub struct Supervisor {
    report: ExecutionReport,
    rx: mpsc::Receiver<SupervisorMessage>,
}

impl Supervisor {
    /// Spawn a supervisor task, returning its sender and handle
    pub fn spawn(
        cycle_id: Uuid,
        capacity: usize,
    ) -> (mpsc::Sender<SupervisorMessage>, JoinHandle<ExecutionReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let supervisor = Self {
            report: ExecutionReport::new(cycle_id),
            rx,
        };
        (tx, tokio::spawn(supervisor.run()))
    }

    async fn run(mut self) -> ExecutionReport {
        let started = std::time::Instant::now();
        while let Some(message) = self.rx.recv().await {
            match message {
                SupervisorMessage::Register { module } => {
                    debug!(cycle_id = %self.report.cycle_id, module = %module, "module registered");
                    self.report.record(ModuleReport::registered(module));
                }
                SupervisorMessage::Finished(summary) => {
                    debug!(
                        cycle_id = %self.report.cycle_id,
                        module = %summary.module,
                        final_state = %summary.final_state,
                        "module finished"
                    );
                    self.report.record(ModuleReport::from_summary(*summary));
                }
                SupervisorMessage::Report => self.log_report(),
                SupervisorMessage::Exit { timed_out } => {
                    self.report.timed_out = timed_out;
                    break;
                }
            }
        }
        self.report.duration = started.elapsed();
        self.report
    }

    fn log_report(&self) {
        let report = &self.report;
        info!(
            cycle_id = %report.cycle_id,
            modules = report.modules.len(),
            successful = report.successful(),
            unsuccessful = report.unsuccessful(),
            aborted = report.aborted(),
            unfinished = report.unfinished(),
            "cycle report"
        );
        for module in &report.modules {
            if module.aborted() {
                warn!(module = %module.module, error = ?module.error, "module aborted");
            } else if !module.successful() {
                warn!(
                    module = %module.module,
                    verification = ?module.verification,
                    "module did not succeed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(module: &str, final_state: ExecutionState, verification: Option<Verification>) -> RunSummary {
        let mut summary = RunSummary::not_started(module, ErrorInfo::new("X", "y"));
        summary.final_state = final_state;
        summary.verification = verification;
        if final_state == ExecutionState::Finished {
            summary.error = None;
        }
        summary
    }

    #[tokio::test]
    async fn test_supervisor_collects_summaries() {
        let (tx, handle) = Supervisor::spawn(Uuid::now_v7(), 8);

        for name in ["a", "b", "c", "d"] {
            tx.send(SupervisorMessage::Register { module: name.into() })
                .await
                .expect("should send");
        }
        let finished = [
            summary("a", ExecutionState::Finished, Some(Verification::Success)),
            summary(
                "b",
                ExecutionState::Finished,
                Some(Verification::PartialFailure { expected: 10, saved: 9 }),
            ),
            summary("c", ExecutionState::Aborted, None),
        ];
        for s in finished {
            tx.send(SupervisorMessage::Finished(Box::new(s)))
                .await
                .expect("should send");
        }
        tx.send(SupervisorMessage::Report).await.expect("should send");
        tx.send(SupervisorMessage::Exit { timed_out: true })
            .await
            .expect("should send");

        let report = handle.await.expect("supervisor should not panic");
        assert_eq!(report.modules.len(), 4);
        assert_eq!(report.successful(), 1);
        assert_eq!(report.unsuccessful(), 1);
        assert_eq!(report.aborted(), 1);
        assert_eq!(report.unfinished(), 1);
        assert!(report.timed_out);
        assert_eq!(report.error_classes().get("X"), Some(&1));
    }

    #[tokio::test]
    async fn test_supervisor_exits_when_senders_drop() {
        let (tx, handle) = Supervisor::spawn(Uuid::now_v7(), 1);
        drop(tx);

        let report = handle.await.expect("supervisor should not panic");
        assert!(report.modules.is_empty());
        assert!(!report.timed_out);
    }
}

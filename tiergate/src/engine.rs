//! Gate Engine: drives one run of the tier
//!
//! ```text
//! Idle → SelectingChecks → Executing → Aggregating → Reporting → Done
//!   └─────────────┴──── (workspace invalid) ────────→ Reporting
//! ```
//!
//! Checks run on a bounded pool (`JoinSet` + `Semaphore`). Every started check
//! gets `min(default timeout, remaining budget)`; a check still queued when the
//! global deadline passes is skipped. Cancellation skips queued checks and
//! interrupts running ones, and a partial report is still written.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregator::{Aggregator, RunMeta};
use crate::config::GateConfig;
use crate::error::{GateError, GateResult};
use crate::policy::PolicyTable;
use crate::registry::{CheckRegistry, RegisteredCheck, RunMode};
use crate::report::{CheckResult, Report};
use crate::runner::{CheckRunner, RunContext, BUDGET_EXHAUSTED_REASON, CANCELLED_REASON};
use crate::sink::{ReportSink, SinkOutcome};
use crate::workspace::{validate_workspace, WorkspaceProfile};

/// Phase of a gate run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    SelectingChecks,
    Executing,
    Aggregating,
    Reporting,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::SelectingChecks => "selecting_checks",
            Self::Executing => "executing",
            Self::Aggregating => "aggregating",
            Self::Reporting => "reporting",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

fn is_legal_transition(from: RunPhase, to: RunPhase) -> bool {
    use RunPhase::*;

    matches!(
        (from, to),
        (Idle, SelectingChecks)
            | (SelectingChecks, Executing)
            | (Executing, Aggregating)
            | (Aggregating, Reporting)
            | (Reporting, Done)
            // A run that cannot start still reports
            | (Idle, Reporting)
            | (SelectingChecks, Reporting)
    )
}

/// Guarded phase tracker for one run
#[derive(Debug, Clone)]
pub struct RunLifecycle {
    current: RunPhase,
    history: Vec<RunPhase>,
    started: Instant,
}

impl RunLifecycle {
    pub fn new() -> Self {
        Self {
            current: RunPhase::Idle,
            history: vec![RunPhase::Idle],
            started: Instant::now(),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.current
    }

    /// Move to `to`, rejecting anything but the next phase or an abort
    pub fn advance(&mut self, to: RunPhase) -> GateResult<()> {
        if !is_legal_transition(self.current, to) {
            return Err(GateError::InvalidTransition {
                from: self.current.to_string(),
                to: to.to_string(),
            });
        }
        debug!(
            from = %self.current,
            to = %to,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Run phase transition"
        );
        self.current = to;
        self.history.push(to);
        Ok(())
    }

    /// Every phase entered, starting with `Idle`
    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }
}

impl Default for RunLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: Report,
    pub sink: SinkOutcome,
    pub phases: Vec<RunPhase>,
}

/// Orchestrates selection, execution, aggregation and reporting
pub struct GateEngine {
    config: GateConfig,
    registry: CheckRegistry,
    sink: ReportSink,
}

impl GateEngine {
    /// Standard deep tier, with threshold overrides from `config.policy_path`
    pub fn new(config: GateConfig) -> GateResult<Self> {
        let policies = match &config.policy_path {
            Some(path) => PolicyTable::load_overrides(path)?,
            None => PolicyTable::standard(),
        };
        let registry = CheckRegistry::deep_tier(&config, &policies)?;
        Ok(Self::with_registry(config, registry))
    }

    /// Engine over an explicit registry
    pub fn with_registry(config: GateConfig, registry: CheckRegistry) -> Self {
        let sink = ReportSink::new(&config);
        Self {
            config,
            registry,
            sink,
        }
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Paths the workspace walk must not count as sources
    fn own_outputs(&self) -> Vec<PathBuf> {
        vec![
            self.config.artifact_dir.clone(),
            self.config.report_path.clone(),
            self.config.history_path(),
        ]
    }

    /// Execute one run. Only an invalid workspace or a report that cannot be
    /// written returns an error; every check-level problem is in the report.
    pub async fn run(&self, mode: &RunMode, cancel: CancellationToken) -> GateResult<RunOutcome> {
        let run_id = Uuid::new_v4();
        let timestamp = Utc::now();
        let start = Instant::now();
        let deadline = budget_deadline(tokio::time::Instant::now(), self.config.time_budget_secs);
        let mut lifecycle = RunLifecycle::new();
        let aborted = |workspace: String, reason: String| RunMeta {
            run_id,
            timestamp,
            workspace,
            duration_ms: start.elapsed().as_millis() as u64,
            interrupted: Some(reason),
        };

        info!(
            %run_id,
            mode = %mode,
            workspace = %self.config.workspace.display(),
            budget_secs = self.config.time_budget_secs,
            "Starting deep tier run"
        );

        let workspace = match validate_workspace(&self.config.workspace) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Workspace invalid, writing empty failing report");
                let meta = aborted(self.config.workspace.display().to_string(), e.to_string());
                self.abort(&mut lifecycle, meta).await?;
                return Err(e);
            }
        };

        lifecycle.advance(RunPhase::SelectingChecks)?;
        let profile = match WorkspaceProfile::scan(&workspace, &self.own_outputs()) {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "Workspace scan failed, writing empty failing report");
                let meta = aborted(workspace.display().to_string(), e.to_string());
                self.abort(&mut lifecycle, meta).await?;
                return Err(e);
            }
        };
        let selected: Vec<RegisteredCheck> =
            self.registry.resolve(mode).into_iter().cloned().collect();
        info!(
            checks = selected.len(),
            ids = ?selected.iter().map(|c| c.id().as_str()).collect::<Vec<_>>(),
            "Selected checks"
        );

        lifecycle.advance(RunPhase::Executing)?;
        let runner = CheckRunner::new(RunContext {
            workspace: workspace.clone(),
            profile: Arc::new(profile),
            artifact_root: self.config.artifact_dir.join(run_id.to_string()),
            baseline: self.config.baseline.clone(),
            tools: Arc::new(self.config.tools.clone()),
            error_max_bytes: self.config.error_max_bytes,
        });
        let results = self.execute(&runner, &selected, deadline, &cancel).await;

        lifecycle.advance(RunPhase::Aggregating)?;
        let interrupted = if cancel.is_cancelled() {
            Some(CANCELLED_REASON.to_string())
        } else if results
            .iter()
            .any(|r| r.skip_reason() == Some(BUDGET_EXHAUSTED_REASON))
            || (tokio::time::Instant::now() >= deadline && results.iter().any(|r| r.timed_out()))
        {
            Some(BUDGET_EXHAUSTED_REASON.to_string())
        } else {
            None
        };

        let mut aggregator = Aggregator::new(selected.iter().map(|c| c.id().clone()).collect());
        for result in results {
            if let Err(e) = aggregator.record(result) {
                warn!(error = %e, "Dropping unexpected check result");
            }
        }
        for id in aggregator.pending() {
            if let Some(check) = selected.iter().find(|c| c.id() == &id) {
                let result = runner.skipped(check, "no result recorded");
                if let Err(e) = aggregator.record(result) {
                    warn!(error = %e, "Could not record placeholder result");
                }
            }
        }
        let report = aggregator.finish(RunMeta {
            run_id,
            timestamp,
            workspace: workspace.display().to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            interrupted,
        });

        lifecycle.advance(RunPhase::Reporting)?;
        let sink = self.sink.deliver(&report).await?;

        lifecycle.advance(RunPhase::Done)?;
        info!(%run_id, summary = %report.summary_line(), "Deep tier run finished");

        Ok(RunOutcome {
            report,
            sink,
            phases: lifecycle.history().to_vec(),
        })
    }

    /// Write a zero-check failing report for a run that never reached execution
    async fn abort(&self, lifecycle: &mut RunLifecycle, meta: RunMeta) -> GateResult<SinkOutcome> {
        lifecycle.advance(RunPhase::Reporting)?;
        let report = Aggregator::aborted(meta);
        let sink = self.sink.deliver(&report).await?;
        lifecycle.advance(RunPhase::Done)?;
        Ok(sink)
    }

    /// Run `selected` on the bounded pool; results come back in completion order
    async fn execute(
        &self,
        runner: &CheckRunner,
        selected: &[RegisteredCheck],
        deadline: tokio::time::Instant,
        cancel: &CancellationToken,
    ) -> Vec<CheckResult> {
        let sem = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut join_set: JoinSet<CheckResult> = JoinSet::new();
        let mut task_checks = HashMap::new();

        for check in selected {
            let sem = sem.clone();
            let runner = runner.clone();
            let cancel = cancel.clone();
            let task_check = check.clone();

            let handle = join_set.spawn(async move {
                let check = task_check;
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return runner.skipped(&check, CANCELLED_REASON),
                    _ = tokio::time::sleep_until(deadline) => {
                        return runner.skipped(&check, BUDGET_EXHAUSTED_REASON)
                    }
                    permit = sem.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return runner.skipped(&check, "worker pool closed"),
                    },
                };

                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    return runner.skipped(&check, BUDGET_EXHAUSTED_REASON);
                }
                let timeout = check.definition.default_timeout.min(remaining);
                runner.run(&check, timeout, &cancel).await
            });
            task_checks.insert(handle.id(), check);
        }

        let mut results = Vec::with_capacity(selected.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    let Some(check) = task_checks.get(&e.id()) else {
                        warn!(error = %e, "Check task failed with unknown id");
                        continue;
                    };
                    warn!(check = %check.id(), error = %e, "Check task panicked");
                    let message = if e.is_panic() {
                        panic_message(e.into_panic())
                    } else {
                        e.to_string()
                    };
                    results.push(runner.panicked(check, &message));
                }
            }
        }
        results
    }
}

/// Global deadline for a run. A budget past the clock's range never expires.
fn budget_deadline(now: tokio::time::Instant, budget_secs: u64) -> tokio::time::Instant {
    now.checked_add(Duration::from_secs(budget_secs))
        .unwrap_or_else(|| now + UNBOUNDED_BUDGET)
}

/// Stand-in deadline for budgets too large to represent
const UNBOUNDED_BUDGET: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

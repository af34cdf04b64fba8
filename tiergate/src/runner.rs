//! Check Runner: one check, start to finish
//!
//! applicability → tool on PATH → preflight → scratch dir → invoke (under the
//! check's timeout and the run's cancellation token) → parse → classify.
//!
//! Every adapter error is folded into the returned `CheckResult`: a
//! `ToolUnavailable` becomes a skip, anything else a failure. Nothing a tool
//! does can abort the run.

use chrono::Utc;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::adapters::{truncate_str, InvocationContext, ParsedOutput};
use crate::config::ToolSettings;
use crate::error::{format_limit, GateError, GateResult};
use crate::registry::RegisteredCheck;
use crate::report::{CheckResult, CheckStatus, Finding};
use crate::workspace::WorkspaceProfile;

/// Skip reason for checks that never started because the run was cancelled
pub const CANCELLED_REASON: &str = "run cancelled";

/// Skip reason for checks still queued when the global budget ran out
pub const BUDGET_EXHAUSTED_REASON: &str = "time budget exhausted";

/// Run-wide inputs shared by every check
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Canonical workspace root
    pub workspace: PathBuf,
    pub profile: Arc<WorkspaceProfile>,
    /// Run-scoped artifact directory; each check gets `<artifact_root>/<check id>`
    pub artifact_root: PathBuf,
    pub baseline: Option<PathBuf>,
    pub tools: Arc<ToolSettings>,
    /// Cap on raw diagnostics copied into a result
    pub error_max_bytes: usize,
}

/// Executes single checks against a shared `RunContext`
#[derive(Debug, Clone)]
pub struct CheckRunner {
    ctx: Arc<RunContext>,
}

impl CheckRunner {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Run one check. Never fails: problems are part of the result.
    pub async fn run(
        &self,
        check: &RegisteredCheck,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> CheckResult {
        let def = &check.definition;
        let started_at = Utc::now();
        let start = Instant::now();

        let skip = |reason: String| self.skipped(check, reason);

        if cancel.is_cancelled() {
            return skip(CANCELLED_REASON.to_string());
        }
        if let Err(reason) = def.applicability.evaluate(&self.ctx.profile) {
            return skip(reason);
        }
        if !check.adapter.is_installed() {
            return skip(format!("{} is not installed", check.adapter.tool()));
        }

        let ctx = InvocationContext {
            check: def.id.clone(),
            workspace: self.ctx.workspace.clone(),
            profile: Arc::clone(&self.ctx.profile),
            scratch_dir: self.ctx.artifact_root.join(def.id.as_str()),
            baseline: self.ctx.baseline.clone(),
            tools: Arc::clone(&self.ctx.tools),
        };

        let outcome = self.execute(check, &ctx, timeout, cancel).await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(parsed) => self.graded(check, parsed, duration_ms, started_at),
            Err(e) if e.is_unavailable() => skip(e.to_string()),
            Err(e) => self.failed(check, e, duration_ms, started_at),
        }
    }

    /// Skip result carrying the check's category and tool
    pub fn skipped(&self, check: &RegisteredCheck, reason: impl Into<String>) -> CheckResult {
        let def = &check.definition;
        let reason = reason.into();
        tracing::info!(check = %def.id, reason = %reason, "Check skipped");
        let mut result = CheckResult::skipped(def.id.clone(), &def.name, reason, Utc::now());
        self.base_details(check, &mut result.details);
        result
    }

    /// Failure result for a check whose task panicked
    pub fn panicked(&self, check: &RegisteredCheck, message: &str) -> CheckResult {
        let error = GateError::execution(
            check.adapter.tool(),
            None,
            format!("check task panicked: {message}"),
        );
        self.failed(check, error, 0, Utc::now())
    }

    async fn execute(
        &self,
        check: &RegisteredCheck,
        ctx: &InvocationContext,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> GateResult<ParsedOutput> {
        check.adapter.preflight(ctx)?;
        std::fs::create_dir_all(&ctx.scratch_dir)?;

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GateError::Cancelled {
                reason: CANCELLED_REASON.to_string(),
            }),
            res = tokio::time::timeout(timeout, check.adapter.invoke(ctx)) => match res {
                Ok(raw) => raw,
                Err(_) => Err(GateError::Timeout {
                    ms: timeout.as_millis() as u64,
                }),
            },
        }?;

        check.adapter.parse(&raw, ctx)
    }

    fn base_details(&self, check: &RegisteredCheck, details: &mut Map<String, Value>) {
        details.insert(
            "category".to_string(),
            Value::String(check.definition.category.to_string()),
        );
        details.insert(
            "tool".to_string(),
            Value::String(check.adapter.tool().to_string()),
        );
    }

    fn graded(
        &self,
        check: &RegisteredCheck,
        parsed: ParsedOutput,
        duration_ms: u64,
        started_at: chrono::DateTime<Utc>,
    ) -> CheckResult {
        let def = &check.definition;
        let status = check.policy.classify(&parsed.counts);

        let mut details = parsed.details;
        self.base_details(check, &mut details);
        let counts: Map<String, Value> = parsed
            .counts
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect();
        details.insert("counts".to_string(), Value::Object(counts));

        let violations = check.policy.violations(&parsed.counts);
        if !violations.is_empty() {
            details.insert("threshold_exceeded".to_string(), Value::from(violations));
        }

        tracing::info!(
            check = %def.id,
            status = %status,
            duration_ms,
            findings = parsed.findings.len(),
            "Check complete"
        );

        CheckResult {
            check: def.id.clone(),
            name: def.name.clone(),
            status,
            details,
            findings: parsed.findings,
            suggestions: parsed.suggestions,
            duration_ms,
            started_at,
        }
    }

    fn failed(
        &self,
        check: &RegisteredCheck,
        error: GateError,
        duration_ms: u64,
        started_at: chrono::DateTime<Utc>,
    ) -> CheckResult {
        let def = &check.definition;
        tracing::warn!(check = %def.id, code = error.code(), error = %error, "Check failed");

        let mut details = Map::new();
        self.base_details(check, &mut details);
        details.insert("error_code".to_string(), Value::from(error.code()));
        details.insert(
            "error".to_string(),
            Value::String(truncate_str(&error.to_string(), self.ctx.error_max_bytes)),
        );
        if let Some(code) = error.exit_code() {
            details.insert("exit_code".to_string(), Value::from(code));
        }

        let mut findings = Vec::new();
        let mut suggestions = Vec::new();
        match &error {
            GateError::Timeout { ms } => {
                findings.push(Finding::timeout(format!(
                    "{} did not finish within {}; partial output discarded",
                    check.adapter.tool(),
                    format_limit(ms)
                )));
                details.insert("timeout_ms".to_string(), Value::from(*ms));
                suggestions.push(format!(
                    "Run {} on its own (`deep-gate {}`) or raise the time budget",
                    def.id, def.id
                ));
            }
            GateError::Cancelled { .. } => {
                findings.push(Finding::timeout(format!(
                    "{} was interrupted by run cancellation",
                    check.adapter.tool()
                )));
            }
            _ => {}
        }

        CheckResult {
            check: def.id.clone(),
            name: def.name.clone(),
            status: CheckStatus::Fail,
            details,
            findings,
            suggestions,
            duration_ms,
            started_at,
        }
    }
}

//! Report: the result schema shared by every check
//!
//! `CheckResult` is what one check produces; `Report` is what one run produces.
//! Both serialize to the JSON document CI reads, so field names here are part
//! of the external contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::registry::CheckId;

/// Report schema version
pub const SCHEMA_VERSION: &str = "1.0";

/// Tier number of the deep verification tier
pub const DEEP_TIER: u8 = 3;

/// Tier name of the deep verification tier
pub const DEEP_TIER_NAME: &str = "deep";

/// Name of the finding recorded when a check runs out of time
pub const TIMEOUT_RULE: &str = "timeout";

/// Status of one check, or of the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Check ran and nothing crossed a threshold
    Pass,
    /// Check ran and crossed a warning threshold; never blocks the pipeline
    Warn,
    /// Check ran and crossed a failure threshold, crashed, or timed out
    Fail,
    /// Check did not run (no applicable sources, tool missing, budget exhausted)
    Skip,
}

impl CheckStatus {
    /// Severity rank used for precedence. Skip ranks lowest: it never changes a verdict.
    pub fn rank(self) -> u8 {
        match self {
            Self::Skip => 0,
            Self::Pass => 1,
            Self::Warn => 2,
            Self::Fail => 3,
        }
    }

    /// Whether this status blocks a pipeline
    pub fn is_blocking(self) -> bool {
        self == Self::Fail
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Warn => write!(f, "WARN"),
            Self::Fail => write!(f, "FAIL"),
            Self::Skip => write!(f, "SKIP"),
        }
    }
}

/// Overall verdict: fail if any check failed, else warn if any warned, else pass.
///
/// Skips are ignored, so an all-skip run passes.
pub fn overall_status<I>(statuses: I) -> CheckStatus
where
    I: IntoIterator<Item = CheckStatus>,
{
    statuses
        .into_iter()
        .filter(|s| *s != CheckStatus::Skip)
        .max_by_key(|s| s.rank())
        .unwrap_or(CheckStatus::Pass)
}

/// Severity of a single finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A single reported issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Rule id or category (e.g. "NULL_DEREFERENCE", "timeout")
    pub rule: String,
    /// Human-readable message
    pub message: String,
    /// File relative to the workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// 1-based line number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    pub severity: Severity,
}

impl Finding {
    pub fn new(rule: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
            file: None,
            line: None,
            severity,
        }
    }

    /// Attach a location
    pub fn at(mut self, file: impl Into<String>, line: Option<u64>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    /// The finding recorded for a timed-out or cancelled check
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TIMEOUT_RULE, message, Severity::Critical)
    }
}

/// Result of a single check. Built once by the runner, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Registry id of the check
    pub check: CheckId,
    /// Display name of the check
    pub name: String,
    pub status: CheckStatus,
    /// Structured details: counts, tool, error diagnostics, skip reason
    #[serde(default)]
    pub details: Map<String, Value>,
    /// Findings in tool order
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl CheckResult {
    /// A check that did not run, with a human-readable reason
    pub fn skipped(
        check: CheckId,
        name: impl Into<String>,
        reason: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut details = Map::new();
        details.insert("reason".to_string(), Value::String(reason.into()));
        Self {
            check,
            name: name.into(),
            status: CheckStatus::Skip,
            details,
            findings: Vec::new(),
            suggestions: Vec::new(),
            duration_ms: 0,
            started_at,
        }
    }

    /// Skip reason, if this result is a skip
    pub fn skip_reason(&self) -> Option<&str> {
        if self.status != CheckStatus::Skip {
            return None;
        }
        self.details.get("reason").and_then(Value::as_str)
    }

    /// Whether this result carries the timeout finding
    pub fn timed_out(&self) -> bool {
        self.findings.iter().any(|f| f.rule == TIMEOUT_RULE)
    }

    /// Integer detail lookup (counts are stored as JSON numbers)
    pub fn detail_u64(&self, key: &str) -> Option<u64> {
        self.details.get(key).and_then(Value::as_u64)
    }

    /// One console line: `[PASS] complexity  120ms  functions=42 high=3`
    pub fn console_line(&self) -> String {
        let extra = match self.skip_reason() {
            Some(reason) => reason.to_string(),
            None => self
                .details
                .get("counts")
                .and_then(Value::as_object)
                .map(|counts| {
                    counts
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .or_else(|| {
                    self.details
                        .get("error")
                        .and_then(Value::as_str)
                        .map(|e| e.lines().next().unwrap_or_default().to_string())
                })
                .unwrap_or_default(),
        };
        format!(
            "[{}] {:<18} {:>7}ms  {}",
            self.status,
            self.check.as_str(),
            self.duration_ms,
            extra
        )
    }
}

/// Per-status counts over the attempted checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_checks: usize,
    pub passed: usize,
    pub warnings: usize,
    pub failures: usize,
    pub skipped: usize,
}

impl ReportSummary {
    /// Count one status
    pub fn count(&mut self, status: CheckStatus) {
        self.total_checks += 1;
        match status {
            CheckStatus::Pass => self.passed += 1,
            CheckStatus::Warn => self.warnings += 1,
            CheckStatus::Fail => self.failures += 1,
            CheckStatus::Skip => self.skipped += 1,
        }
    }

    /// `total_checks == passed + warnings + failures + skipped`
    pub fn is_consistent(&self) -> bool {
        self.total_checks == self.passed + self.warnings + self.failures + self.skipped
    }
}

/// The run-level report. Constructed once by the aggregator and written once by the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub tier: u8,
    pub tier_name: String,
    /// Report schema version
    pub version: String,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Workspace that was analyzed
    pub workspace: String,
    pub duration_ms: u64,
    /// Overall verdict
    pub status: CheckStatus,
    pub summary: ReportSummary,
    /// Results in registry order
    pub checks: Vec<CheckResult>,
    /// Why the run stopped early (cancellation, exhausted budget, invalid workspace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<String>,
}

impl Report {
    /// CI exit code: warnings never block, failures do
    pub fn exit_code(&self) -> i32 {
        if self.status.is_blocking() {
            1
        } else {
            0
        }
    }

    /// Look up one check's result
    pub fn check(&self, id: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check.as_str() == id)
    }

    /// Ordered check ids, for reproducibility comparisons
    pub fn check_order(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.check.as_str()).collect()
    }

    /// Compact one-line summary for logs and the console
    pub fn summary_line(&self) -> String {
        format!(
            "[{}] tier {} ({}): {} checks, {} passed, {} warned, {} failed, {} skipped ({}ms)",
            self.status,
            self.tier,
            self.tier_name,
            self.summary.total_checks,
            self.summary.passed,
            self.summary.warnings,
            self.summary.failures,
            self.summary.skipped,
            self.duration_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &'static str, status: CheckStatus) -> CheckResult {
        CheckResult {
            check: CheckId::from_static(id),
            name: id.to_string(),
            status,
            details: Map::new(),
            findings: vec![],
            suggestions: vec![],
            duration_ms: 10,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", CheckStatus::Pass), "PASS");
        assert_eq!(format!("{}", CheckStatus::Warn), "WARN");
        assert_eq!(format!("{}", CheckStatus::Fail), "FAIL");
        assert_eq!(format!("{}", CheckStatus::Skip), "SKIP");
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&CheckStatus::Warn).unwrap();
        assert_eq!(json, "\"warn\"");
    }

    #[test]
    fn test_overall_status_precedence() {
        use CheckStatus::*;
        assert_eq!(overall_status([Pass, Warn, Pass]), Warn);
        assert_eq!(overall_status([Warn, Fail, Pass, Skip]), Fail);
        assert_eq!(overall_status([Skip, Skip]), Pass);
        assert_eq!(overall_status([]), Pass);
        assert_eq!(overall_status([Skip, Warn]), Warn);
    }

    #[test]
    fn test_summary_counts_are_consistent() {
        let mut summary = ReportSummary::default();
        for s in [
            CheckStatus::Pass,
            CheckStatus::Warn,
            CheckStatus::Fail,
            CheckStatus::Skip,
            CheckStatus::Skip,
        ] {
            summary.count(s);
        }
        assert_eq!(summary.total_checks, 5);
        assert_eq!(summary.skipped, 2);
        assert!(summary.is_consistent());
    }

    #[test]
    fn test_summary_json_field_names() {
        let summary = ReportSummary {
            total_checks: 1,
            passed: 1,
            ..Default::default()
        };
        let value = serde_json::to_value(summary).unwrap();
        for key in ["total_checks", "failures", "warnings", "passed", "skipped"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_skipped_result_carries_reason() {
        let r = CheckResult::skipped(
            CheckId::from_static("complexity"),
            "Complexity",
            "no Python sources",
            Utc::now(),
        );
        assert_eq!(r.status, CheckStatus::Skip);
        assert_eq!(r.skip_reason(), Some("no Python sources"));
        assert!(r.console_line().contains("no Python sources"));
    }

    #[test]
    fn test_timeout_finding_detected() {
        let mut r = result("bug_finder", CheckStatus::Fail);
        assert!(!r.timed_out());
        r.findings.push(Finding::timeout("timed out after 5s"));
        assert!(r.timed_out());
        assert_eq!(r.findings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_report_exit_code_contract() {
        let mut report = Report {
            tier: DEEP_TIER,
            tier_name: DEEP_TIER_NAME.to_string(),
            version: SCHEMA_VERSION.to_string(),
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            workspace: "/tmp/ws".to_string(),
            duration_ms: 5,
            status: CheckStatus::Pass,
            summary: ReportSummary::default(),
            checks: vec![result("complexity", CheckStatus::Pass)],
            interrupted: None,
        };
        assert_eq!(report.exit_code(), 0);
        report.status = CheckStatus::Warn;
        assert_eq!(report.exit_code(), 0);
        report.status = CheckStatus::Fail;
        assert_eq!(report.exit_code(), 1);
        assert!(report.summary_line().starts_with("[FAIL] tier 3 (deep)"));
        assert!(report.check("complexity").is_some());
    }

    #[test]
    fn test_check_result_json_shape() {
        let r = result("benchmarks", CheckStatus::Pass);
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["check"], "benchmarks");
        assert_eq!(value["status"], "pass");
        for key in ["details", "findings", "suggestions", "duration_ms"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}

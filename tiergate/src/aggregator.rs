//! Aggregator: collects check results into one report
//!
//! Results arrive in completion order; the report lists them in registry
//! order so two runs over the same workspace produce the same layout.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{GateError, GateResult};
use crate::registry::CheckId;
use crate::report::{
    overall_status, CheckResult, CheckStatus, Report, ReportSummary, DEEP_TIER, DEEP_TIER_NAME,
    SCHEMA_VERSION,
};

/// Run-level facts the aggregator does not compute itself
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub workspace: String,
    pub duration_ms: u64,
    pub interrupted: Option<String>,
}

/// Accumulates results for the checks selected for a run
#[derive(Debug)]
pub struct Aggregator {
    order: Vec<CheckId>,
    results: HashMap<CheckId, CheckResult>,
    summary: ReportSummary,
}

impl Aggregator {
    /// `order` is the selected checks in registry order
    pub fn new(order: Vec<CheckId>) -> Self {
        Self {
            order,
            results: HashMap::new(),
            summary: ReportSummary::default(),
        }
    }

    /// Record one result; unknown or repeated ids are rejected
    pub fn record(&mut self, result: CheckResult) -> GateResult<()> {
        if !self.order.contains(&result.check) {
            return Err(GateError::UnknownCheck {
                name: result.check.to_string(),
                valid: self
                    .order
                    .iter()
                    .map(CheckId::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        if self.results.contains_key(&result.check) {
            return Err(GateError::DuplicateCheck {
                id: result.check.to_string(),
            });
        }
        self.summary.count(result.status);
        self.results.insert(result.check.clone(), result);
        Ok(())
    }

    /// Selected checks with no result yet, in registry order
    pub fn pending(&self) -> Vec<CheckId> {
        self.order
            .iter()
            .filter(|id| !self.results.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> ReportSummary {
        self.summary
    }

    /// Build the report. Checks appear in registry order.
    pub fn finish(mut self, meta: RunMeta) -> Report {
        let checks: Vec<CheckResult> = self
            .order
            .iter()
            .filter_map(|id| self.results.remove(id))
            .collect();
        let status = overall_status(checks.iter().map(|c| c.status));
        build_report(meta, status, self.summary, checks)
    }

    /// Report for a run that could not start (e.g. invalid workspace): no
    /// checks, status fail, the reason in `interrupted`
    pub fn aborted(meta: RunMeta) -> Report {
        build_report(meta, CheckStatus::Fail, ReportSummary::default(), Vec::new())
    }
}

fn build_report(
    meta: RunMeta,
    status: CheckStatus,
    summary: ReportSummary,
    checks: Vec<CheckResult>,
) -> Report {
    Report {
        tier: DEEP_TIER,
        tier_name: DEEP_TIER_NAME.to_string(),
        version: SCHEMA_VERSION.to_string(),
        run_id: meta.run_id,
        timestamp: meta.timestamp,
        workspace: meta.workspace,
        duration_ms: meta.duration_ms,
        status,
        summary,
        checks,
        interrupted: meta.interrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BENCHMARKS, COMPLEXITY, SEMANTIC_SCAN};

    fn result(id: CheckId, status: CheckStatus) -> CheckResult {
        CheckResult {
            check: id.clone(),
            name: id.to_string(),
            status,
            details: Default::default(),
            findings: vec![],
            suggestions: vec![],
            duration_ms: 1,
            started_at: Utc::now(),
        }
    }

    fn meta() -> RunMeta {
        RunMeta {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            workspace: "/ws".to_string(),
            duration_ms: 10,
            interrupted: None,
        }
    }

    #[test]
    fn test_finish_sorts_by_registry_order() {
        let mut agg = Aggregator::new(vec![SEMANTIC_SCAN, BENCHMARKS, COMPLEXITY]);
        agg.record(result(COMPLEXITY, CheckStatus::Warn)).unwrap();
        agg.record(result(SEMANTIC_SCAN, CheckStatus::Pass)).unwrap();
        agg.record(result(BENCHMARKS, CheckStatus::Skip)).unwrap();

        let report = agg.finish(meta());
        assert_eq!(report.check_order(), vec!["semantic_scan", "benchmarks", "complexity"]);
        assert_eq!(report.status, CheckStatus::Warn);
        assert_eq!(report.summary.total_checks, 3);
        assert_eq!(report.summary.skipped, 1);
        assert!(report.summary.is_consistent());
        assert_eq!(report.tier, 3);
        assert_eq!(report.tier_name, "deep");
    }

    #[test]
    fn test_record_rejects_unknown_and_duplicate() {
        let mut agg = Aggregator::new(vec![SEMANTIC_SCAN]);
        let err = agg.record(result(COMPLEXITY, CheckStatus::Pass)).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_CHECK");

        agg.record(result(SEMANTIC_SCAN, CheckStatus::Pass)).unwrap();
        let err = agg.record(result(SEMANTIC_SCAN, CheckStatus::Fail)).unwrap_err();
        assert!(matches!(err, GateError::DuplicateCheck { .. }));
        assert_eq!(agg.summary().total_checks, 1);
    }

    #[test]
    fn test_pending() {
        let mut agg = Aggregator::new(vec![SEMANTIC_SCAN, COMPLEXITY]);
        agg.record(result(COMPLEXITY, CheckStatus::Pass)).unwrap();
        assert_eq!(agg.pending(), vec![SEMANTIC_SCAN]);
    }

    #[test]
    fn test_all_skipped_is_pass() {
        let mut agg = Aggregator::new(vec![SEMANTIC_SCAN, COMPLEXITY]);
        agg.record(result(SEMANTIC_SCAN, CheckStatus::Skip)).unwrap();
        agg.record(result(COMPLEXITY, CheckStatus::Skip)).unwrap();
        let report = agg.finish(meta());
        assert_eq!(report.status, CheckStatus::Pass);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_run_that_never_started_fails() {
        let report = Aggregator::aborted(RunMeta {
            interrupted: Some("invalid workspace".to_string()),
            ..meta()
        });
        assert_eq!(report.status, CheckStatus::Fail);
        assert!(report.checks.is_empty());
        assert_eq!(report.exit_code(), 1);
    }
}

//! Severity policy: threshold tables that turn counts into a status
//!
//! Each check owns a `SeverityPolicy`: an ordered list of rules over named
//! counts. All failure thresholds are evaluated before any warning threshold,
//! so a result that trips several rules always gets the worst status.
//!
//! | Check | Field | Warn above | Fail above |
//! |---|---|---|---|
//! | semantic_scan | critical | | 0 |
//! | semantic_scan | high | 0 | |
//! | bug_finder | null_dereference | | 0 |
//! | bug_finder | thread_safety | | 0 |
//! | bug_finder | resource_leak | 3 | |
//! | integration_tests | failed | | 0 |
//! | benchmarks | regressions | | 0 |
//! | complexity | unmaintainable (cc ≥ 41) | | 0 |
//! | complexity | very_high (cc ≥ 21) | | 3 |
//! | complexity | high (cc ≥ 11) | 10 | |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{GateError, GateResult};
use crate::registry::{self, CheckId};
use crate::report::CheckStatus;

/// Named counts produced by a tool adapter
pub type Counts = BTreeMap<String, u64>;

/// One threshold over one count. Strictly greater than the threshold trips it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_above: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_above: Option<u64>,
}

impl ThresholdRule {
    pub fn fail_above(field: &str, limit: u64) -> Self {
        Self {
            field: field.to_string(),
            warn_above: None,
            fail_above: Some(limit),
        }
    }

    pub fn warn_above(field: &str, limit: u64) -> Self {
        Self {
            field: field.to_string(),
            warn_above: Some(limit),
            fail_above: None,
        }
    }
}

/// Ordered rules for one check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityPolicy {
    pub rules: Vec<ThresholdRule>,
}

impl SeverityPolicy {
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self { rules }
    }

    /// Map counts to pass/warn/fail. Missing counts read as 0.
    pub fn classify(&self, counts: &Counts) -> CheckStatus {
        let value = |field: &str| counts.get(field).copied().unwrap_or(0);

        let fails = self
            .rules
            .iter()
            .any(|r| r.fail_above.is_some_and(|limit| value(&r.field) > limit));
        if fails {
            return CheckStatus::Fail;
        }

        let warns = self
            .rules
            .iter()
            .any(|r| r.warn_above.is_some_and(|limit| value(&r.field) > limit));
        if warns {
            return CheckStatus::Warn;
        }

        CheckStatus::Pass
    }

    /// Human-readable list of tripped thresholds, most severe first
    pub fn violations(&self, counts: &Counts) -> Vec<String> {
        let value = |field: &str| counts.get(field).copied().unwrap_or(0);
        let mut out = Vec::new();

        for rule in &self.rules {
            if let Some(limit) = rule.fail_above {
                let v = value(&rule.field);
                if v > limit {
                    out.push(format!("fail: {} = {} (limit {})", rule.field, v, limit));
                }
            }
        }
        for rule in &self.rules {
            if let Some(limit) = rule.warn_above {
                let v = value(&rule.field);
                if v > limit {
                    out.push(format!("warn: {} = {} (limit {})", rule.field, v, limit));
                }
            }
        }
        out
    }

    fn validate(&self, check: &str) -> GateResult<()> {
        for rule in &self.rules {
            if rule.warn_above.is_none() && rule.fail_above.is_none() {
                return Err(GateError::config(format!(
                    "policy for '{check}': rule on '{}' has neither warn_above nor fail_above",
                    rule.field
                )));
            }
        }
        Ok(())
    }
}

/// Benchmark comparison ratios against the baseline mean
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkFactors {
    /// `mean / baseline_mean >= regression_factor` is a regression
    pub regression_factor: f64,
    /// `mean / baseline_mean < improvement_factor` is an improvement
    pub improvement_factor: f64,
}

impl Default for BenchmarkFactors {
    fn default() -> Self {
        Self {
            regression_factor: 1.2,
            improvement_factor: 0.8,
        }
    }
}

/// Policies for every check plus benchmark factors
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    policies: BTreeMap<String, SeverityPolicy>,
    pub benchmark: BenchmarkFactors,
}

/// On-disk override shape
#[derive(Debug, Default, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    checks: BTreeMap<String, SeverityPolicy>,
    #[serde(default)]
    benchmark_factors: Option<BenchmarkFactors>,
}

impl PolicyTable {
    /// The documented deep-tier thresholds
    pub fn standard() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert(
            registry::SEMANTIC_SCAN.as_str().to_string(),
            SeverityPolicy::new(vec![
                ThresholdRule::fail_above("critical", 0),
                ThresholdRule::warn_above("high", 0),
            ]),
        );
        policies.insert(
            registry::BUG_FINDER.as_str().to_string(),
            SeverityPolicy::new(vec![
                ThresholdRule::fail_above("null_dereference", 0),
                ThresholdRule::fail_above("thread_safety", 0),
                ThresholdRule::warn_above("resource_leak", 3),
            ]),
        );
        policies.insert(
            registry::INTEGRATION_TESTS.as_str().to_string(),
            SeverityPolicy::new(vec![ThresholdRule::fail_above("failed", 0)]),
        );
        policies.insert(
            registry::BENCHMARKS.as_str().to_string(),
            SeverityPolicy::new(vec![ThresholdRule::fail_above("regressions", 0)]),
        );
        policies.insert(
            registry::COMPLEXITY.as_str().to_string(),
            SeverityPolicy::new(vec![
                ThresholdRule::fail_above("unmaintainable", 0),
                ThresholdRule::fail_above("very_high", 3),
                ThresholdRule::warn_above("high", 10),
            ]),
        );

        Self {
            policies,
            benchmark: BenchmarkFactors::default(),
        }
    }

    /// Policy for a check; an unknown check gets an empty policy (always pass)
    pub fn policy_for(&self, id: &CheckId) -> SeverityPolicy {
        self.policies.get(id.as_str()).cloned().unwrap_or_default()
    }

    /// Replace a check's policy
    pub fn set(&mut self, id: &CheckId, policy: SeverityPolicy) {
        self.policies.insert(id.as_str().to_string(), policy);
    }

    /// Merge overrides from a TOML string. Sections must name a known check.
    pub fn merge_toml(&mut self, text: &str) -> GateResult<()> {
        let file: PolicyFile = toml::from_str(text)?;
        for (check, policy) in &file.checks {
            if !self.policies.contains_key(check) {
                let known: Vec<&str> = self.policies.keys().map(String::as_str).collect();
                return Err(GateError::config(format!(
                    "policy override for unknown check '{check}' (known: {})",
                    known.join(", ")
                )));
            }
            policy.validate(check)?;
        }
        if let Some(factors) = &file.benchmark_factors {
            if !(factors.improvement_factor > 0.0
                && factors.improvement_factor < factors.regression_factor)
            {
                return Err(GateError::config(format!(
                    "benchmark factors must satisfy 0 < improvement_factor < regression_factor, got {} / {}",
                    factors.improvement_factor, factors.regression_factor
                )));
            }
        }

        self.policies.extend(file.checks);
        if let Some(factors) = file.benchmark_factors {
            self.benchmark = factors;
        }
        Ok(())
    }

    /// Standard table with overrides from a TOML file
    pub fn load_overrides(path: &Path) -> GateResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GateError::config(format!("cannot read policy file {}: {e}", path.display()))
        })?;
        let mut table = Self::standard();
        table.merge_toml(&text)?;
        tracing::info!(path = %path.display(), "Loaded threshold policy overrides");
        Ok(table)
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

//! Run configuration
//!
//! Defaults live in `Default`; `from_env` layers `DEEP_GATE_*` variables on
//! top. The CLI applies its flags last.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult};

pub const ENV_WORKSPACE: &str = "DEEP_GATE_WORKSPACE";
pub const ENV_TIME_BUDGET: &str = "DEEP_GATE_TIME_BUDGET_SECS";
pub const ENV_BASELINE: &str = "DEEP_GATE_BASELINE";
pub const ENV_COLLECTOR_URL: &str = "DEEP_GATE_COLLECTOR_URL";
pub const ENV_REPORT_PATH: &str = "DEEP_GATE_REPORT_PATH";
pub const ENV_ARTIFACT_DIR: &str = "DEEP_GATE_ARTIFACT_DIR";
pub const ENV_PARALLELISM: &str = "DEEP_GATE_PARALLELISM";
pub const ENV_POLICY: &str = "DEEP_GATE_POLICY";
pub const ENV_SEMGREP_CONFIG: &str = "DEEP_GATE_SEMGREP_CONFIG";
pub const ENV_INFER_BUILD_CMD: &str = "DEEP_GATE_INFER_BUILD_CMD";
pub const ENV_PYTEST_ARGS: &str = "DEEP_GATE_PYTEST_ARGS";
pub const ENV_INTEGRATION_DIR: &str = "DEEP_GATE_INTEGRATION_DIR";
pub const ENV_BENCH_DIR: &str = "DEEP_GATE_BENCH_DIR";

/// Per-tool settings handed to adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Semgrep rule suite (`--config` value)
    pub semgrep_config: String,
    /// Build command Infer captures; detected from the workspace when unset
    pub infer_build_cmd: Option<Vec<String>>,
    /// Extra arguments appended to pytest invocations
    pub pytest_args: Vec<String>,
    /// Integration test directory, relative to the workspace
    pub integration_dir: PathBuf,
    /// Benchmark directory, relative to the workspace
    pub bench_dir: PathBuf,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            semgrep_config: "p/security-audit".to_string(),
            infer_build_cmd: None,
            pytest_args: Vec::new(),
            integration_dir: PathBuf::from("tests/integration"),
            bench_dir: PathBuf::from("benchmarks"),
        }
    }
}

/// Top-level configuration for one gate run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Workspace root (read-only to every check)
    pub workspace: PathBuf,
    /// Global time budget for the whole tier (seconds)
    pub time_budget_secs: u64,
    /// Benchmark baseline JSON
    pub baseline: Option<PathBuf>,
    /// Remote collector for a best-effort report push
    pub collector_url: Option<String>,
    /// Fixed report path
    pub report_path: PathBuf,
    /// Root of check-scoped scratch directories
    pub artifact_dir: PathBuf,
    /// Maximum number of checks running at once
    pub parallelism: usize,
    /// TOML file overriding threshold policy
    pub policy_path: Option<PathBuf>,
    /// Truncate raw tool diagnostics to this many bytes
    pub error_max_bytes: usize,
    /// Collector request timeout (seconds)
    pub push_timeout_secs: u64,
    pub tools: ToolSettings,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            time_budget_secs: 1800,
            baseline: None,
            collector_url: None,
            report_path: PathBuf::from("reports/deep-tier-report.json"),
            artifact_dir: PathBuf::from("reports/deep-tier-artifacts"),
            parallelism: default_parallelism(),
            policy_path: None,
            error_max_bytes: 4096,
            push_timeout_secs: 10,
            tools: ToolSettings::default(),
        }
    }
}

impl GateConfig {
    /// Defaults overridden by `DEEP_GATE_*` environment variables
    pub fn from_env() -> GateResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> GateResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get(ENV_WORKSPACE) {
            config.workspace = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_TIME_BUDGET) {
            config.time_budget_secs = parse_positive(ENV_TIME_BUDGET, &v)?;
        }
        if let Some(v) = get(ENV_BASELINE) {
            config.baseline = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_COLLECTOR_URL) {
            config.collector_url = Some(v);
        }
        if let Some(v) = get(ENV_REPORT_PATH) {
            config.report_path = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_ARTIFACT_DIR) {
            config.artifact_dir = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_PARALLELISM) {
            config.parallelism = parse_positive(ENV_PARALLELISM, &v)? as usize;
        }
        if let Some(v) = get(ENV_POLICY) {
            config.policy_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_SEMGREP_CONFIG) {
            config.tools.semgrep_config = v;
        }
        if let Some(v) = get(ENV_INFER_BUILD_CMD) {
            config.tools.infer_build_cmd = Some(split_args(ENV_INFER_BUILD_CMD, &v)?);
        }
        if let Some(v) = get(ENV_PYTEST_ARGS) {
            config.tools.pytest_args = split_args(ENV_PYTEST_ARGS, &v)?;
        }
        if let Some(v) = get(ENV_INTEGRATION_DIR) {
            config.tools.integration_dir = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_BENCH_DIR) {
            config.tools.bench_dir = PathBuf::from(v);
        }

        Ok(config)
    }

    /// History file kept next to the report
    pub fn history_path(&self) -> PathBuf {
        self.report_path.with_file_name("deep-tier-history.jsonl")
    }
}

/// Worker pool size: available parallelism, at least 1
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_positive(key: &str, value: &str) -> GateResult<u64> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(GateError::config(format!(
            "{key} must be a positive integer, got '{value}'"
        ))),
    }
}

/// Split a shell-style argument string (`make -j4 "CFLAGS=-O0 -g"`)
pub fn split_args(key: &str, value: &str) -> GateResult<Vec<String>> {
    let args = shlex::split(value)
        .ok_or_else(|| GateError::config(format!("{key} has unbalanced quoting: {value}")))?;
    if args.is_empty() {
        return Err(GateError::config(format!("{key} is empty")));
    }
    Ok(args)
}

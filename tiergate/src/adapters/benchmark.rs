//! pytest-benchmark adapter: performance regression check
//!
//! Runs the benchmark directory with `--benchmark-only --benchmark-json` and
//! compares each benchmark's mean against the baseline file (same JSON format)
//! by full name. Without a baseline the run always passes and the produced
//! JSON is offered as the next baseline.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;

use super::pytest::{pytest_command, EXIT_NO_TESTS, TOOL};
use super::{run_tool, tail, InvocationContext, ParsedOutput, RawOutput, ToolAdapter};
use crate::error::{GateError, GateResult};
use crate::policy::BenchmarkFactors;
use crate::report::{Finding, Severity};

const OUTPUT_FILE: &str = "benchmark.json";

#[derive(Debug, Deserialize)]
struct BenchmarkFile {
    #[serde(default)]
    benchmarks: Vec<BenchmarkEntry>,
}

#[derive(Debug, Deserialize)]
struct BenchmarkEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    fullname: Option<String>,
    stats: BenchmarkStats,
}

#[derive(Debug, Deserialize)]
struct BenchmarkStats {
    mean: f64,
}

impl BenchmarkEntry {
    fn key(&self) -> &str {
        self.fullname.as_deref().unwrap_or(&self.name)
    }
}

fn load(text: &str, source: &str) -> GateResult<BenchmarkFile> {
    serde_json::from_str(text).map_err(|e| GateError::parse(source, e.to_string()))
}

fn load_baseline(path: &Path) -> GateResult<HashMap<String, f64>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        GateError::parse("baseline", format!("cannot read {}: {e}", path.display()))
    })?;
    let file = load(&text, "baseline")?;
    Ok(file
        .benchmarks
        .iter()
        .map(|b| (b.key().to_string(), b.stats.mean))
        .collect())
}

/// Compares benchmark means against a baseline
#[derive(Debug, Default)]
pub struct BenchmarkAdapter {
    factors: BenchmarkFactors,
}

impl BenchmarkAdapter {
    pub fn new(factors: BenchmarkFactors) -> Self {
        Self { factors }
    }
}

#[async_trait]
impl ToolAdapter for BenchmarkAdapter {
    fn tool(&self) -> &str {
        TOOL
    }

    async fn invoke(&self, ctx: &InvocationContext) -> GateResult<RawOutput> {
        let target = ctx.workspace.join(&ctx.tools.bench_dir);
        let output_path = ctx.scratch(OUTPUT_FILE);

        let mut cmd = pytest_command(&target);
        cmd.arg("--benchmark-only")
            .arg(format!("--benchmark-json={}", output_path.display()));

        let output = run_tool(&mut cmd, TOOL, &ctx.workspace).await?;
        let raw = RawOutput::from_output(&output).with_artifact(output_path);

        match raw.exit_code {
            Some(0) => Ok(raw),
            Some(EXIT_NO_TESTS) => Err(GateError::unavailable(format!(
                "no benchmarks collected in {}",
                ctx.tools.bench_dir.display()
            ))),
            code => Err(GateError::execution(TOOL, code, tail(&raw.stdout, 20))),
        }
    }

    fn parse(&self, raw: &RawOutput, ctx: &InvocationContext) -> GateResult<ParsedOutput> {
        let current = load(&raw.read_artifact(TOOL)?, TOOL)?;

        let mut parsed = ParsedOutput::default();
        parsed.count("benchmarks", current.benchmarks.len() as u64);

        let Some(baseline_path) = &ctx.baseline else {
            for field in ["regressions", "improvements", "missing_from_baseline"] {
                parsed.count(field, 0);
            }
            if let Some(path) = &raw.artifact {
                parsed.detail("baseline_candidate", path.display().to_string());
            }
            parsed.detail("regressions", 0u64);
            parsed.detail("compared", false);
            return Ok(parsed);
        };

        let baseline = load_baseline(baseline_path)?;
        let mut regressions = 0u64;
        let mut improvements = Vec::new();
        let mut missing = Vec::new();

        for bench in &current.benchmarks {
            let name = bench.key();
            let Some(&base_mean) = baseline.get(name) else {
                missing.push(name.to_string());
                continue;
            };
            if base_mean <= 0.0 {
                tracing::debug!(benchmark = name, "Baseline mean is not positive, skipping");
                continue;
            }

            let ratio = bench.stats.mean / base_mean;
            if ratio >= self.factors.regression_factor {
                regressions += 1;
                parsed.findings.push(Finding::new(
                    "benchmark_regression",
                    format!(
                        "{name}: mean {:.6}s vs baseline {:.6}s ({ratio:.2}x)",
                        bench.stats.mean, base_mean
                    ),
                    Severity::High,
                ));
                parsed
                    .suggestions
                    .push(format!("Profile {name}; it is {ratio:.2}x slower than baseline"));
            } else if ratio < self.factors.improvement_factor {
                improvements.push(json!({ "name": name, "ratio": ratio }));
            }
        }

        parsed.count("regressions", regressions);
        parsed.count("improvements", improvements.len() as u64);
        parsed.count("missing_from_baseline", missing.len() as u64);

        parsed.detail("regressions", regressions);
        parsed.detail("compared", true);
        parsed.detail("baseline", baseline_path.display().to_string());
        parsed.detail("improved", improvements);
        if !missing.is_empty() {
            parsed.detail("missing", missing);
        }
        parsed.detail(
            "factors",
            json!({
                "regression": self.factors.regression_factor,
                "improvement": self.factors.improvement_factor,
            }),
        );

        Ok(parsed)
    }
}

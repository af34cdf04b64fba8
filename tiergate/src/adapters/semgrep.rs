//! Semgrep adapter: semantic/security scan
//!
//! `semgrep scan --json --output <scratch>/semgrep.json` against the workspace.
//! Severities are folded into four buckets the policy reads:
//! `CRITICAL`/`ERROR` → critical, `HIGH`/`WARNING` → high, `MEDIUM` → medium,
//! `LOW`/`INFO` → low.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{run_tool, tail, InvocationContext, ParsedOutput, RawOutput, ToolAdapter};
use crate::error::{GateError, GateResult};
use crate::report::{Finding, Severity};

const TOOL: &str = "semgrep";
const OUTPUT_FILE: &str = "semgrep.json";

#[derive(Debug, Deserialize)]
struct SemgrepOutput {
    #[serde(default)]
    results: Vec<SemgrepResult>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SemgrepResult {
    check_id: String,
    path: String,
    #[serde(default)]
    start: Option<SemgrepPosition>,
    #[serde(default)]
    extra: SemgrepExtra,
}

#[derive(Debug, Deserialize)]
struct SemgrepPosition {
    line: u64,
}

#[derive(Debug, Default, Deserialize)]
struct SemgrepExtra {
    #[serde(default)]
    message: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    fix: Option<String>,
}

/// Map a semgrep severity string to a finding severity
pub fn map_severity(raw: &str) -> Severity {
    match raw.to_ascii_uppercase().as_str() {
        "CRITICAL" | "ERROR" => Severity::Critical,
        "HIGH" | "WARNING" => Severity::High,
        "MEDIUM" => Severity::Medium,
        "LOW" | "INFO" => Severity::Low,
        _ => Severity::Info,
    }
}

/// Runs semgrep with the configured rule suite
#[derive(Debug, Default)]
pub struct SemgrepAdapter;

impl SemgrepAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolAdapter for SemgrepAdapter {
    fn tool(&self) -> &str {
        TOOL
    }

    async fn invoke(&self, ctx: &InvocationContext) -> GateResult<RawOutput> {
        let output_path = ctx.scratch(OUTPUT_FILE);

        let mut cmd = tokio::process::Command::new(TOOL);
        cmd.arg("scan")
            .arg("--config")
            .arg(&ctx.tools.semgrep_config)
            .args(["--json", "--metrics", "off", "--quiet", "--disable-version-check"])
            .arg("--output")
            .arg(&output_path)
            .arg(&ctx.workspace);

        let output = run_tool(&mut cmd, TOOL, &ctx.workspace).await?;
        let raw = RawOutput::from_output(&output).with_artifact(output_path);

        // 0 = clean, 1 = findings with --error; anything else is a semgrep failure
        match raw.exit_code {
            Some(0) | Some(1) => Ok(raw),
            code => Err(GateError::execution(TOOL, code, tail(&raw.stderr, 20))),
        }
    }

    fn parse(&self, raw: &RawOutput, ctx: &InvocationContext) -> GateResult<ParsedOutput> {
        let text = raw.read_artifact(TOOL)?;
        let report: SemgrepOutput =
            serde_json::from_str(&text).map_err(|e| GateError::parse(TOOL, e.to_string()))?;

        let mut parsed = ParsedOutput::default();
        let mut by_severity: BTreeMap<Severity, u64> = BTreeMap::new();
        let mut critical_rules: BTreeMap<String, u64> = BTreeMap::new();

        for result in &report.results {
            let severity = map_severity(&result.extra.severity);
            *by_severity.entry(severity).or_insert(0) += 1;
            if severity == Severity::Critical {
                *critical_rules.entry(result.check_id.clone()).or_insert(0) += 1;
            }

            let file = ctx.display_path(&result.path);
            let line = result.start.as_ref().map(|s| s.line);
            let message = if result.extra.message.is_empty() {
                result.check_id.clone()
            } else {
                result.extra.message.trim().to_string()
            };
            parsed
                .findings
                .push(Finding::new(&result.check_id, message, severity).at(&file, line));

            if let Some(fix) = result.extra.fix.as_deref().filter(|f| !f.trim().is_empty()) {
                let location = line.map(|l| format!("{file}:{l}")).unwrap_or(file);
                parsed
                    .suggestions
                    .push(format!("{location}: apply autofix `{}`", fix.trim()));
            }
        }

        for (rule, n) in &critical_rules {
            parsed
                .suggestions
                .push(format!("Remediate {rule} ({n} occurrence(s)) before merging"));
        }

        let count = |s: Severity| by_severity.get(&s).copied().unwrap_or(0);
        parsed.count("critical", count(Severity::Critical));
        parsed.count("high", count(Severity::High));
        parsed.count("medium", count(Severity::Medium));
        parsed.count("low", count(Severity::Low) + count(Severity::Info));
        parsed.count("scan_errors", report.errors.len() as u64);
        parsed.detail("rule_suite", ctx.tools.semgrep_config.clone());
        parsed.detail("total_findings", report.results.len() as u64);

        Ok(parsed)
    }
}

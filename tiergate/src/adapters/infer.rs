//! Infer adapter: interprocedural bug finder
//!
//! `infer run --results-dir <scratch>/infer-out -- <build command>`, then
//! `<results-dir>/report.json` is read. The build command comes from
//! `DEEP_GATE_INFER_BUILD_CMD` or is detected from build files in the workspace.

use async_trait::async_trait;
use serde::Deserialize;

use super::{run_tool, tail, InvocationContext, ParsedOutput, RawOutput, ToolAdapter};
use crate::error::{GateError, GateResult};
use crate::report::{Finding, Severity};

const TOOL: &str = "infer";
const RESULTS_DIR: &str = "infer-out";

const NULL_DEREFERENCE: &[&str] = &["NULL_DEREFERENCE", "NULLPTR_DEREFERENCE"];
const THREAD_SAFETY: &[&str] = &["THREAD_SAFETY_VIOLATION", "LOCK_CONSISTENCY_VIOLATION"];
const RESOURCE_LEAK: &[&str] = &["RESOURCE_LEAK", "PULSE_RESOURCE_LEAK"];

#[derive(Debug, Deserialize)]
struct InferIssue {
    bug_type: String,
    #[serde(default)]
    qualifier: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<i64>,
    #[serde(default)]
    procedure: Option<String>,
}

/// Bucket an Infer bug type into the counts the policy reads
fn bucket(bug_type: &str) -> &'static str {
    if NULL_DEREFERENCE.contains(&bug_type) {
        "null_dereference"
    } else if THREAD_SAFETY.contains(&bug_type) {
        "thread_safety"
    } else if RESOURCE_LEAK.contains(&bug_type) {
        "resource_leak"
    } else {
        "other"
    }
}

/// Build command Infer should capture, detected from workspace build files
pub fn detect_build_command(ctx: &InvocationContext) -> GateResult<Vec<String>> {
    if let Some(cmd) = &ctx.tools.infer_build_cmd {
        return Ok(cmd.clone());
    }

    let profile = &ctx.profile;
    let argv: &[&str] = if profile.has_path("pom.xml") {
        &["mvn", "-q", "compile"]
    } else if profile.has_path("gradlew") {
        &["./gradlew", "build", "-x", "test"]
    } else if profile.has_path("build.gradle") || profile.has_path("build.gradle.kts") {
        &["gradle", "build", "-x", "test"]
    } else if profile.has_path("Makefile") {
        &["make"]
    } else if profile.has_path("CMakeLists.txt") {
        return Err(GateError::unavailable(
            "CMake project needs an explicit build command (DEEP_GATE_INFER_BUILD_CMD)",
        ));
    } else {
        return Err(GateError::unavailable(
            "no build command detected (set DEEP_GATE_INFER_BUILD_CMD)",
        ));
    };
    Ok(argv.iter().map(|s| s.to_string()).collect())
}

/// Runs Infer over the workspace build
#[derive(Debug, Default)]
pub struct InferAdapter;

impl InferAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolAdapter for InferAdapter {
    fn tool(&self) -> &str {
        TOOL
    }

    fn preflight(&self, ctx: &InvocationContext) -> GateResult<()> {
        detect_build_command(ctx).map(|_| ())
    }

    async fn invoke(&self, ctx: &InvocationContext) -> GateResult<RawOutput> {
        let build = detect_build_command(ctx)?;
        let results_dir = ctx.scratch(RESULTS_DIR);

        let mut cmd = tokio::process::Command::new(TOOL);
        cmd.arg("run")
            .arg("--results-dir")
            .arg(&results_dir)
            .arg("--")
            .args(&build);

        let output = run_tool(&mut cmd, TOOL, &ctx.workspace).await?;
        let raw = RawOutput::from_output(&output).with_artifact(results_dir.join("report.json"));

        if raw.exit_code != Some(0) {
            let diagnostic = if raw.stderr.trim().is_empty() {
                tail(&raw.stdout, 20)
            } else {
                tail(&raw.stderr, 20)
            };
            return Err(GateError::execution(TOOL, raw.exit_code, diagnostic));
        }
        Ok(raw)
    }

    fn parse(&self, raw: &RawOutput, _ctx: &InvocationContext) -> GateResult<ParsedOutput> {
        let text = raw.read_artifact(TOOL)?;
        let issues: Vec<InferIssue> =
            serde_json::from_str(&text).map_err(|e| GateError::parse(TOOL, e.to_string()))?;

        let mut parsed = ParsedOutput::default();
        for field in ["null_dereference", "thread_safety", "resource_leak", "other"] {
            parsed.count(field, 0);
        }

        for issue in &issues {
            let field = bucket(&issue.bug_type);
            *parsed.counts.entry(field.to_string()).or_insert(0) += 1;

            let severity = match field {
                "null_dereference" | "thread_safety" => Severity::Critical,
                "resource_leak" => Severity::High,
                _ => Severity::Medium,
            };
            let message = match &issue.procedure {
                Some(proc) if !proc.is_empty() => format!("{} (in {proc})", issue.qualifier),
                _ => issue.qualifier.clone(),
            };
            let mut finding = Finding::new(&issue.bug_type, message, severity);
            if let Some(file) = &issue.file {
                let line = issue.line.filter(|l| *l > 0).map(|l| l as u64);
                finding = finding.at(file, line);
            }
            parsed.findings.push(finding);
        }
        parsed.count("total", issues.len() as u64);

        let n = |f: &str| parsed.counts.get(f).copied().unwrap_or(0);
        let mut suggestions = Vec::new();
        if n("null_dereference") > 0 {
            suggestions.push(
                "Guard the reported dereferences with explicit null checks or Optional types"
                    .to_string(),
            );
        }
        if n("thread_safety") > 0 {
            suggestions.push(
                "Synchronize the reported fields consistently or make the class immutable"
                    .to_string(),
            );
        }
        if n("resource_leak") > 0 {
            suggestions
                .push("Close the leaked resources with try-with-resources / RAII".to_string());
        }
        parsed.suggestions = suggestions;

        Ok(parsed)
    }
}

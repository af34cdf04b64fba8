//! Pytest adapter: integration test runner
//!
//! Runs the integration test directory with `pytest -q -rfE` and reads the
//! final summary line (`2 failed, 10 passed, 1 skipped in 3.21s`). Failed and
//! errored test ids from the short summary become findings.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::{run_tool, tail, InvocationContext, ParsedOutput, RawOutput, ToolAdapter};
use crate::error::{GateError, GateResult};
use crate::report::{Finding, Severity};

pub(crate) const TOOL: &str = "pytest";
const LOG_FILE: &str = "pytest.log";

/// Pytest exit code for "no tests were collected"
pub(crate) const EXIT_NO_TESTS: i32 = 5;

/// Final summary line: `== 2 failed, 10 passed in 3.21s ==`
static SUMMARY_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bin \d+(\.\d+)?s\b").expect("SUMMARY_LINE_RE regex should compile")
});

static OUTCOME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) (passed|failed|skipped|errors?|xfailed|xpassed|deselected)\b")
        .expect("OUTCOME_RE regex should compile")
});

/// `-rfE` short summary: `FAILED path::test[param id] - reason`. Parametrize
/// ids may contain spaces and " - ", so the bracket is matched as a whole.
static SHORT_SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(FAILED|ERROR) (\S+?)(?:::(\S*?(?:\[.*?\])?))?(?: - (.*))?$")
        .expect("SHORT_SUMMARY_RE regex should compile")
});

/// Counts from a pytest run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PytestSummary {
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub xfailed: u64,
    pub xpassed: u64,
}

/// Parse the last pytest summary line in `output`; None if there is none
pub fn parse_summary(output: &str) -> Option<PytestSummary> {
    let line = output
        .lines()
        .rev()
        .find(|l| {
            SUMMARY_LINE_RE.is_match(l)
                && (OUTCOME_RE.is_match(l) || l.contains("no tests ran"))
        })?;

    let mut summary = PytestSummary::default();
    for cap in OUTCOME_RE.captures_iter(line) {
        let n: u64 = cap[1].parse().unwrap_or(0);
        match &cap[2] {
            "passed" => summary.passed += n,
            "failed" => summary.failed += n,
            "skipped" => summary.skipped += n,
            "error" | "errors" => summary.errors += n,
            "xfailed" => summary.xfailed += n,
            "xpassed" => summary.xpassed += n,
            _ => {}
        }
    }
    Some(summary)
}

/// Build the base pytest command shared by the test and benchmark adapters
pub(crate) fn pytest_command(target: &Path) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(TOOL);
    cmd.arg(target)
        .args(["-q", "-rfE", "-p", "no:cacheprovider"])
        .env("PYTHONDONTWRITEBYTECODE", "1");
    cmd
}

/// Runs the integration test suite
#[derive(Debug, Default)]
pub struct PytestAdapter;

impl PytestAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolAdapter for PytestAdapter {
    fn tool(&self) -> &str {
        TOOL
    }

    async fn invoke(&self, ctx: &InvocationContext) -> GateResult<RawOutput> {
        let target = ctx.workspace.join(&ctx.tools.integration_dir);
        let log_path = ctx.scratch(LOG_FILE);

        let mut cmd = pytest_command(&target);
        cmd.arg(format!("--junitxml={}", ctx.scratch("junit.xml").display()))
            .args(&ctx.tools.pytest_args);

        let output = run_tool(&mut cmd, TOOL, &ctx.workspace).await?;
        let raw = RawOutput::from_output(&output);
        std::fs::write(&log_path, format!("{}\n{}", raw.stdout, raw.stderr))?;

        match raw.exit_code {
            Some(0) | Some(1) => Ok(raw.with_artifact(log_path)),
            Some(EXIT_NO_TESTS) => Err(GateError::unavailable(format!(
                "no tests collected in {}",
                ctx.tools.integration_dir.display()
            ))),
            code => Err(GateError::execution(TOOL, code, tail(&raw.stdout, 20))),
        }
    }

    fn parse(&self, raw: &RawOutput, ctx: &InvocationContext) -> GateResult<ParsedOutput> {
        let summary = parse_summary(&raw.stdout)
            .ok_or_else(|| GateError::parse(TOOL, "no pytest summary line in output"))?;

        let mut parsed = ParsedOutput::default();
        for line in raw.stdout.lines() {
            let Some(cap) = SHORT_SUMMARY_RE.captures(line.trim_end()) else {
                continue;
            };
            let file = cap[2].to_string();
            let test = cap.get(3).map(|m| m.as_str()).unwrap_or("<collection>");
            let reason = cap.get(4).map(|m| m.as_str()).unwrap_or("test failed");
            let rule = if &cap[1] == "ERROR" {
                "test_error"
            } else {
                "test_failure"
            };
            parsed.findings.push(
                Finding::new(rule, format!("{test}: {reason}"), Severity::High).at(file, None),
            );
        }

        // Collection/setup errors block just like failures
        parsed.count("passed", summary.passed + summary.xpassed);
        parsed.count("failed", summary.failed + summary.errors);
        parsed.count("skipped", summary.skipped + summary.xfailed);
        parsed.count("errors", summary.errors);
        parsed.count(
            "total",
            summary.passed
                + summary.failed
                + summary.skipped
                + summary.errors
                + summary.xfailed
                + summary.xpassed,
        );

        if summary.failed + summary.errors > 0 {
            parsed.suggestions.push(format!(
                "Reproduce locally with: pytest {} -x -rfE",
                ctx.tools.integration_dir.display()
            ));
        }
        if summary.skipped > 0 {
            parsed.detail(
                "note",
                format!("{} skipped test(s) reported, non-blocking", summary.skipped),
            );
        }

        Ok(parsed)
    }
}

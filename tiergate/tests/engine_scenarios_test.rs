//! End-to-end runs of the engine with fake analyzers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tiergate::adapters::BenchmarkAdapter;
use tiergate::registry::{BENCHMARKS, BUG_FINDER, COMPLEXITY, INTEGRATION_TESTS, SEMANTIC_SCAN};
use tiergate::{
    Applicability, CheckCategory, CheckDefinition, CheckId, CheckRegistry, CheckStatus,
    GateConfig, GateEngine, GateError, GateResult, InvocationContext, ParsedOutput, PolicyTable,
    RawOutput, RunMode, RunPhase, ToolAdapter,
};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Behavior {
    Counts(Vec<(&'static str, u64)>),
    Missing,
    Sleep(Duration),
    Panic,
    Crash,
}

struct FakeAdapter {
    tool: String,
    behavior: Behavior,
}

#[async_trait]
impl ToolAdapter for FakeAdapter {
    fn tool(&self) -> &str {
        &self.tool
    }

    fn is_installed(&self) -> bool {
        !matches!(self.behavior, Behavior::Missing)
    }

    async fn invoke(&self, _ctx: &InvocationContext) -> GateResult<RawOutput> {
        match &self.behavior {
            Behavior::Sleep(d) => tokio::time::sleep(*d).await,
            Behavior::Panic => panic!("adapter blew up"),
            Behavior::Crash => {
                return Err(GateError::execution(&self.tool, Some(139), "segmentation fault"))
            }
            _ => {}
        }
        Ok(RawOutput::default())
    }

    fn parse(&self, _raw: &RawOutput, _ctx: &InvocationContext) -> GateResult<ParsedOutput> {
        let mut parsed = ParsedOutput::default();
        if let Behavior::Counts(counts) = &self.behavior {
            for (field, n) in counts {
                parsed.count(field, *n);
            }
        }
        Ok(parsed)
    }
}

/// Writes a pytest-benchmark JSON into its scratch dir, then parses it for real
struct ScriptedBenchmarks {
    means: Vec<(&'static str, f64)>,
}

#[async_trait]
impl ToolAdapter for ScriptedBenchmarks {
    fn tool(&self) -> &str {
        "pytest"
    }

    fn is_installed(&self) -> bool {
        true
    }

    async fn invoke(&self, ctx: &InvocationContext) -> GateResult<RawOutput> {
        let path = ctx.scratch("benchmark.json");
        std::fs::write(&path, bench_json(&self.means))?;
        Ok(RawOutput::default().with_artifact(path))
    }

    fn parse(&self, raw: &RawOutput, ctx: &InvocationContext) -> GateResult<ParsedOutput> {
        BenchmarkAdapter::default().parse(raw, ctx)
    }
}

fn bench_json(means: &[(&str, f64)]) -> String {
    let benchmarks: Vec<Value> = means
        .iter()
        .map(|(name, mean)| json!({ "name": name, "fullname": name, "stats": { "mean": mean } }))
        .collect();
    json!({ "benchmarks": benchmarks }).to_string()
}

const STANDARD: [CheckId; 5] = [
    SEMANTIC_SCAN,
    BUG_FINDER,
    INTEGRATION_TESTS,
    BENCHMARKS,
    COMPLEXITY,
];

fn definition(id: CheckId, timeout: Duration) -> CheckDefinition {
    CheckDefinition {
        name: id.to_string(),
        id,
        category: CheckCategory::Complexity,
        applicability: Applicability::Always,
        default_timeout: timeout,
    }
}

/// Standard ids and policies, fake adapters, everything applicable
fn registry(behaviors: Vec<Behavior>, timeout: Duration) -> CheckRegistry {
    let policies = PolicyTable::standard();
    let mut registry = CheckRegistry::new();
    for (id, behavior) in STANDARD.into_iter().zip(behaviors) {
        let adapter = Arc::new(FakeAdapter {
            tool: format!("fake-{id}"),
            behavior,
        });
        let policy = policies.policy_for(&id);
        registry
            .register(definition(id, timeout), adapter, policy)
            .unwrap();
    }
    registry
}

fn all_pass() -> Vec<Behavior> {
    vec![Behavior::Counts(vec![]); 5]
}

fn with(mut behaviors: Vec<Behavior>, id: &CheckId, behavior: Behavior) -> Vec<Behavior> {
    let idx = STANDARD.iter().position(|s| s == id).unwrap();
    behaviors[idx] = behavior;
    behaviors
}

struct Harness {
    workspace: tempfile::TempDir,
    out: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("app.py"), "def main():\n    pass\n").unwrap();
        Self {
            workspace,
            out: tempfile::tempdir().unwrap(),
        }
    }

    fn config(&self) -> GateConfig {
        GateConfig {
            workspace: self.workspace.path().to_path_buf(),
            report_path: self.out.path().join("reports/deep-tier-report.json"),
            artifact_dir: self.out.path().join("artifacts"),
            parallelism: 2,
            time_budget_secs: 60,
            ..Default::default()
        }
    }

    fn report_on_disk(&self) -> Value {
        let text =
            std::fs::read_to_string(self.out.path().join("reports/deep-tier-report.json")).unwrap();
        serde_json::from_str(&text).unwrap()
    }
}

async fn run(config: GateConfig, registry: CheckRegistry) -> tiergate::RunOutcome {
    GateEngine::with_registry(config, registry)
        .run(&RunMode::All, CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_scenario_a_high_complexity_warns() {
    let h = Harness::new();
    let behaviors = with(
        all_pass(),
        &COMPLEXITY,
        Behavior::Counts(vec![("unmaintainable", 0), ("very_high", 0), ("high", 12)]),
    );
    let outcome = run(h.config(), registry(behaviors, Duration::from_secs(5))).await;
    let report = &outcome.report;

    assert_eq!(report.check("complexity").unwrap().status, CheckStatus::Warn);
    assert_eq!(report.status, CheckStatus::Warn);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.summary.warnings, 1);
    assert_eq!(report.summary.passed, 4);

    let on_disk = h.report_on_disk();
    assert_eq!(on_disk["status"], "warn");
    assert_eq!(on_disk["tier_name"], "deep");
    assert_eq!(on_disk["checks"][4]["check"], "complexity");
}

#[tokio::test]
async fn test_scenario_b_unmaintainable_function_fails() {
    let h = Harness::new();
    let behaviors = with(
        all_pass(),
        &COMPLEXITY,
        Behavior::Counts(vec![("unmaintainable", 1), ("very_high", 1), ("high", 1)]),
    );
    let outcome = run(h.config(), registry(behaviors, Duration::from_secs(5))).await;

    assert_eq!(
        outcome.report.check("complexity").unwrap().status,
        CheckStatus::Fail
    );
    assert_eq!(outcome.report.status, CheckStatus::Fail);
    assert_eq!(outcome.report.exit_code(), 1);
}

#[tokio::test]
async fn test_scenario_c_benchmark_regressions_fail() {
    let h = Harness::new();
    let baseline = h.out.path().join("baseline.json");
    std::fs::write(
        &baseline,
        bench_json(&[("test_parse", 1.0), ("test_render", 2.0), ("test_io", 1.0)]),
    )
    .unwrap();

    let policies = PolicyTable::standard();
    let mut registry = CheckRegistry::new();
    registry
        .register(
            definition(BENCHMARKS, Duration::from_secs(5)),
            Arc::new(ScriptedBenchmarks {
                means: vec![("test_parse", 1.25), ("test_render", 2.6), ("test_io", 0.9)],
            }),
            policies.policy_for(&BENCHMARKS),
        )
        .unwrap();

    let config = GateConfig {
        baseline: Some(baseline),
        ..h.config()
    };
    let outcome = run(config, registry).await;
    let bench = outcome.report.check("benchmarks").unwrap();

    assert_eq!(bench.status, CheckStatus::Fail);
    assert_eq!(bench.detail_u64("regressions"), Some(2));
    assert_eq!(bench.details["counts"]["improvements"], 0);
    assert_eq!(bench.findings.len(), 2);
    assert_eq!(outcome.report.exit_code(), 1);
}

#[tokio::test]
async fn test_scenario_d_no_tools_all_skip() {
    let h = Harness::new();
    let outcome = run(
        h.config(),
        registry(vec![Behavior::Missing; 5], Duration::from_secs(5)),
    )
    .await;
    let summary = outcome.report.summary;

    assert_eq!(summary.total_checks, 5);
    assert_eq!(summary.passed, 0);
    assert_eq!(summary.warnings, 0);
    assert_eq!(summary.failures, 0);
    assert_eq!(summary.skipped, 5);
    assert_eq!(outcome.report.status, CheckStatus::Pass);
    assert_eq!(outcome.report.exit_code(), 0);
    for check in &outcome.report.checks {
        assert!(check.skip_reason().unwrap().ends_with("is not installed"));
    }
}

#[tokio::test]
async fn test_single_failure_dominates() {
    let h = Harness::new();
    let behaviors = with(
        all_pass(),
        &SEMANTIC_SCAN,
        Behavior::Counts(vec![("critical", 1)]),
    );
    let outcome = run(h.config(), registry(behaviors, Duration::from_secs(5))).await;
    assert_eq!(outcome.report.summary.failures, 1);
    assert_eq!(outcome.report.summary.passed, 4);
    assert_eq!(outcome.report.status, CheckStatus::Fail);
}

#[tokio::test]
async fn test_timeout_is_isolated() {
    let h = Harness::new();
    let behaviors = with(
        all_pass(),
        &SEMANTIC_SCAN,
        Behavior::Sleep(Duration::from_secs(30)),
    );
    let outcome = run(h.config(), registry(behaviors, Duration::from_millis(200))).await;
    let report = &outcome.report;

    let slow = report.check("semantic_scan").unwrap();
    assert_eq!(slow.status, CheckStatus::Fail);
    assert!(slow.timed_out());
    assert_eq!(slow.details["error_code"], "TIMEOUT");

    for id in ["bug_finder", "integration_tests", "benchmarks", "complexity"] {
        assert_eq!(report.check(id).unwrap().status, CheckStatus::Pass, "{id}");
    }
    assert!(report.interrupted.is_none());
}

#[tokio::test]
async fn test_tool_crash_is_isolated() {
    let h = Harness::new();
    let behaviors = with(all_pass(), &BUG_FINDER, Behavior::Crash);
    let outcome = run(h.config(), registry(behaviors, Duration::from_secs(5))).await;

    let crashed = outcome.report.check("bug_finder").unwrap();
    assert_eq!(crashed.status, CheckStatus::Fail);
    assert_eq!(crashed.details["exit_code"], 139);
    assert!(crashed.details["error"]
        .as_str()
        .unwrap()
        .contains("segmentation fault"));
    assert_eq!(outcome.report.summary.passed, 4);
}

#[tokio::test]
async fn test_panicking_adapter_is_isolated() {
    let h = Harness::new();
    let behaviors = with(all_pass(), &INTEGRATION_TESTS, Behavior::Panic);
    let outcome = run(h.config(), registry(behaviors, Duration::from_secs(5))).await;

    let panicked = outcome.report.check("integration_tests").unwrap();
    assert_eq!(panicked.status, CheckStatus::Fail);
    assert_eq!(panicked.details["error_code"], "TOOL_EXECUTION_FAILURE");
    assert!(panicked.details["error"]
        .as_str()
        .unwrap()
        .contains("adapter blew up"));
    assert_eq!(outcome.report.summary.total_checks, 5);
    assert_eq!(outcome.report.summary.passed, 4);
}

#[tokio::test(start_paused = true)]
async fn test_global_budget_skips_queued_checks() {
    let h = Harness::new();
    let config = GateConfig {
        parallelism: 1,
        time_budget_secs: 1,
        ..h.config()
    };
    let behaviors = vec![Behavior::Sleep(Duration::from_secs(5)); 5];
    let outcome = run(config, registry(behaviors, Duration::from_secs(600))).await;
    let report = &outcome.report;

    let timed_out: Vec<_> = report.checks.iter().filter(|c| c.timed_out()).collect();
    assert_eq!(timed_out.len(), 1);
    assert_eq!(timed_out[0].status, CheckStatus::Fail);

    let budget_skips = report
        .checks
        .iter()
        .filter(|c| c.skip_reason() == Some("time budget exhausted"))
        .count();
    assert_eq!(budget_skips, 4);
    assert_eq!(report.interrupted.as_deref(), Some("time budget exhausted"));
    assert_eq!(report.status, CheckStatus::Fail);
    assert!(report.summary.is_consistent());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_writes_partial_report() {
    let h = Harness::new();
    let config = GateConfig {
        parallelism: 1,
        ..h.config()
    };
    let engine = GateEngine::with_registry(
        config,
        registry(
            vec![Behavior::Sleep(Duration::from_secs(5)); 5],
            Duration::from_secs(600),
        ),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let outcome = engine.run(&RunMode::All, cancel).await.unwrap();
    let report = &outcome.report;

    let interrupted: Vec<_> = report
        .checks
        .iter()
        .filter(|c| c.status == CheckStatus::Fail)
        .collect();
    assert_eq!(interrupted.len(), 1);
    assert!(interrupted[0].timed_out());
    assert_eq!(interrupted[0].details["error_code"], "RUN_CANCELLED");
    assert_eq!(
        report
            .checks
            .iter()
            .filter(|c| c.skip_reason() == Some("run cancelled"))
            .count(),
        4
    );
    assert_eq!(report.interrupted.as_deref(), Some("run cancelled"));

    let on_disk = h.report_on_disk();
    assert_eq!(on_disk["interrupted"], "run cancelled");
    assert_eq!(on_disk["summary"]["total_checks"], 5);
}

#[tokio::test]
async fn test_ordering_is_deterministic() {
    let h = Harness::new();
    let behaviors = || {
        vec![
            Behavior::Sleep(Duration::from_millis(80)),
            Behavior::Sleep(Duration::from_millis(60)),
            Behavior::Sleep(Duration::from_millis(40)),
            Behavior::Sleep(Duration::from_millis(20)),
            Behavior::Counts(vec![("high", 11)]),
        ]
    };
    let config = GateConfig {
        parallelism: 5,
        ..h.config()
    };

    let first = run(config.clone(), registry(behaviors(), Duration::from_secs(5))).await;
    let second = run(config, registry(behaviors(), Duration::from_secs(5))).await;

    let expected = vec![
        "semantic_scan",
        "bug_finder",
        "integration_tests",
        "benchmarks",
        "complexity",
    ];
    assert_eq!(first.report.check_order(), expected);
    assert_eq!(second.report.check_order(), expected);
    assert_eq!(first.report.status, second.report.status);
    assert_eq!(first.report.status, CheckStatus::Warn);
    assert_ne!(first.report.run_id, second.report.run_id);
}

#[tokio::test]
async fn test_single_mode_runs_one_check() {
    let h = Harness::new();
    let engine = GateEngine::with_registry(
        h.config(),
        registry(all_pass(), Duration::from_secs(5)),
    );
    let mode = RunMode::parse(engine.registry(), "complexity").unwrap();
    let outcome = engine.run(&mode, CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.report.check_order(), vec!["complexity"]);
    assert_eq!(outcome.report.summary.total_checks, 1);
}

#[tokio::test]
async fn test_phases_are_recorded_in_order() {
    let h = Harness::new();
    let outcome = run(h.config(), registry(all_pass(), Duration::from_secs(5))).await;
    assert_eq!(
        outcome.phases,
        vec![
            RunPhase::Idle,
            RunPhase::SelectingChecks,
            RunPhase::Executing,
            RunPhase::Aggregating,
            RunPhase::Reporting,
            RunPhase::Done,
        ]
    );
    assert!(outcome.sink.history_appended);
}

#[tokio::test]
async fn test_empty_workspace_skips_every_standard_check() {
    let workspace = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let config = GateConfig {
        workspace: workspace.path().to_path_buf(),
        report_path: out.path().join("report.json"),
        artifact_dir: out.path().join("artifacts"),
        ..Default::default()
    };

    let engine = GateEngine::new(config).unwrap();
    let outcome = engine
        .run(&RunMode::All, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.report.summary.skipped, 5);
    assert_eq!(outcome.report.status, CheckStatus::Pass);
    assert_eq!(outcome.report.exit_code(), 0);
}

#[tokio::test]
async fn test_invalid_workspace_still_writes_report() {
    let out = tempfile::tempdir().unwrap();
    let report_path = out.path().join("report.json");
    let config = GateConfig {
        workspace: out.path().join("does-not-exist"),
        report_path: report_path.clone(),
        artifact_dir: out.path().join("artifacts"),
        ..Default::default()
    };

    let err = GateEngine::with_registry(config, registry(all_pass(), Duration::from_secs(5)))
        .run(&RunMode::All, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_WORKSPACE");

    let report: Value = serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap())
        .unwrap();
    assert_eq!(report["status"], "fail");
    assert_eq!(report["checks"].as_array().unwrap().len(), 0);
    assert!(report["interrupted"]
        .as_str()
        .unwrap()
        .contains("does-not-exist"));
}

#[tokio::test]
async fn test_scratch_dirs_are_scoped_by_run() {
    let h = Harness::new();
    let outcome = run(h.config(), registry(all_pass(), Duration::from_secs(5))).await;
    let run_dir = h
        .out
        .path()
        .join("artifacts")
        .join(outcome.report.run_id.to_string());
    assert!(run_dir.join("complexity").is_dir());
    assert!(!h.workspace.path().join("artifacts").exists());
}

#[tokio::test]
async fn test_unbounded_budget_runs_normally() {
    let h = Harness::new();
    let config = GateConfig {
        time_budget_secs: u64::MAX,
        ..h.config()
    };
    let outcome = run(config, registry(all_pass(), Duration::from_secs(5))).await;

    assert_eq!(outcome.report.status, CheckStatus::Pass);
    assert_eq!(outcome.report.summary.passed, 5);
    assert!(outcome.report.interrupted.is_none());
    assert_eq!(h.report_on_disk()["status"], "pass");
}

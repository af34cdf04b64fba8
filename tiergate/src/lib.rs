//! Tiergate: deep verification tier
//!
//! Runs a set of independent analyzers against a workspace, normalizes their
//! output into one result schema, grades each check against a threshold
//! table and writes one machine-readable report plus a CI exit code.
//!
//! # Checks
//!
//! | Id | Tool | Fails when |
//! |---|---|---|
//! | `semantic_scan` | semgrep | any critical finding |
//! | `bug_finder` | infer | any null dereference or thread-safety issue |
//! | `integration_tests` | pytest | any failed or errored test |
//! | `benchmarks` | pytest-benchmark | any mean ≥ 1.2× baseline |
//! | `complexity` | radon | any function ≥ 41, or more than 3 at ≥ 21 |
//!
//! # Usage
//!
//! ```bash
//! # Whole tier against the current directory
//! deep-gate
//!
//! # One check, with a benchmark baseline
//! deep-gate benchmarks --baseline baselines/main.json
//!
//! # CI: no console table, report only
//! deep-gate --report-only --report reports/deep-tier-report.json
//! ```
//!
//! Exit codes: 0 for pass or warn, 1 for fail, 2 for usage errors.

pub mod adapters;
pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod policy;
pub mod registry;
pub mod report;
pub mod runner;
pub mod sink;
pub mod workspace;

pub use adapters::{InvocationContext, ParsedOutput, RawOutput, ToolAdapter};
pub use aggregator::{Aggregator, RunMeta};
pub use config::{GateConfig, ToolSettings};
pub use engine::{GateEngine, RunLifecycle, RunOutcome, RunPhase};
pub use error::{GateError, GateResult};
pub use policy::{BenchmarkFactors, PolicyTable, SeverityPolicy, ThresholdRule};
pub use registry::{
    Applicability, CheckCategory, CheckDefinition, CheckId, CheckListing, CheckRegistry,
    RegisteredCheck, RunMode,
};
pub use report::{CheckResult, CheckStatus, Finding, Report, ReportSummary, Severity};
pub use runner::{CheckRunner, RunContext};
pub use sink::{DeliveryStatus, ReportSink, SinkOutcome};
pub use workspace::WorkspaceProfile;

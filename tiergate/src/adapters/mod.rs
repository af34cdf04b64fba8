//! Tool Adapters: the narrow interface to black-box analyzers
//!
//! Every analyzer is wrapped by one `ToolAdapter`: `invoke` shells out and
//! leaves raw output (plus any file the tool wrote into the check's scratch
//! directory), `parse` normalizes that into counts, findings and suggestions.
//! Adding an analyzer means adding an adapter and registering it; nothing in
//! the runner or engine changes.
//!
//! ```text
//! semgrep       → semantic_scan      (semgrep.rs)
//! infer         → bug_finder         (infer.rs)
//! pytest        → integration_tests  (pytest.rs)
//! pytest-bench  → benchmarks         (benchmark.rs)
//! radon cc      → complexity         (radon.rs)
//! ```

pub mod benchmark;
pub mod infer;
pub mod pytest;
pub mod radon;
pub mod semgrep;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::ToolSettings;
use crate::error::{GateError, GateResult};
use crate::policy::Counts;
use crate::registry::CheckId;
use crate::report::Finding;
use crate::workspace::{find_in_path, WorkspaceProfile};

pub use benchmark::BenchmarkAdapter;
pub use infer::InferAdapter;
pub use pytest::PytestAdapter;
pub use radon::RadonAdapter;
pub use semgrep::SemgrepAdapter;

/// Everything an adapter may look at while running one check
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub check: CheckId,
    /// Canonical workspace root; read-only
    pub workspace: PathBuf,
    pub profile: Arc<WorkspaceProfile>,
    /// Check-scoped directory for tool output; created by the runner
    pub scratch_dir: PathBuf,
    /// Benchmark baseline, when supplied
    pub baseline: Option<PathBuf>,
    pub tools: Arc<ToolSettings>,
}

impl InvocationContext {
    /// Path inside the scratch directory
    pub fn scratch(&self, name: &str) -> PathBuf {
        self.scratch_dir.join(name)
    }

    /// Path relative to the workspace for display; absolute if outside it
    pub fn display_path(&self, path: &str) -> String {
        Path::new(path)
            .strip_prefix(&self.workspace)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| path.to_string())
    }
}

/// What a tool left behind
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Main output file written by the tool, if any
    pub artifact: Option<PathBuf>,
}

impl RawOutput {
    pub fn from_output(output: &std::process::Output) -> Self {
        Self {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, path: PathBuf) -> Self {
        self.artifact = Some(path);
        self
    }

    /// Read the artifact, or fail with a parse error naming the tool
    pub fn read_artifact(&self, tool: &str) -> GateResult<String> {
        let path = self
            .artifact
            .as_ref()
            .ok_or_else(|| GateError::parse(tool, "tool produced no output file"))?;
        std::fs::read_to_string(path).map_err(|e| {
            GateError::parse(tool, format!("cannot read {}: {e}", path.display()))
        })
    }
}

/// Normalized adapter output
#[derive(Debug, Clone, Default)]
pub struct ParsedOutput {
    /// Named counts the severity policy reads
    pub counts: Counts,
    pub findings: Vec<Finding>,
    pub suggestions: Vec<String>,
    /// Extra structured details merged into `CheckResult.details`
    pub details: Map<String, Value>,
}

impl ParsedOutput {
    pub fn count(&mut self, field: &str, n: u64) {
        self.counts.insert(field.to_string(), n);
    }

    pub fn detail(&mut self, key: &str, value: impl Into<Value>) {
        self.details.insert(key.to_string(), value.into());
    }
}

/// Contract every analyzer wrapper implements
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Executable the check needs
    fn tool(&self) -> &str;

    /// Whether the executable can be found
    fn is_installed(&self) -> bool {
        find_in_path(self.tool()).is_some()
    }

    /// Extra applicability the registry predicate cannot express
    /// (e.g. no detectable build command). Err means skip.
    fn preflight(&self, _ctx: &InvocationContext) -> GateResult<()> {
        Ok(())
    }

    /// Run the analyzer against the workspace
    async fn invoke(&self, ctx: &InvocationContext) -> GateResult<RawOutput>;

    /// Normalize the raw output
    fn parse(&self, raw: &RawOutput, ctx: &InvocationContext) -> GateResult<ParsedOutput>;
}

/// Run a prepared command in the workspace and capture its output.
///
/// On Unix the child leads its own process group. If this future is dropped
/// before the child exits (check timeout or run cancellation), the whole group
/// is killed, so builds and workers the tool spawned die with it.
pub async fn run_tool(
    cmd: &mut tokio::process::Command,
    tool: &str,
    cwd: &Path,
) -> GateResult<std::process::Output> {
    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    tracing::debug!(tool, command = ?cmd.as_std(), "Invoking tool");

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GateError::unavailable(format!("{tool} is not installed")));
        }
        Err(e) => {
            return Err(GateError::execution(
                tool,
                None,
                format!("failed to execute: {e}"),
            ));
        }
    };

    let mut group = ProcessGroupGuard::new(tool, child.id());
    let output = child
        .wait_with_output()
        .await
        .map_err(|e| GateError::execution(tool, None, format!("failed to wait: {e}")))?;
    group.disarm();
    Ok(output)
}

/// Kills a child's process group on drop unless the child ran to completion
struct ProcessGroupGuard<'a> {
    tool: &'a str,
    pgid: Option<u32>,
}

impl<'a> ProcessGroupGuard<'a> {
    fn new(tool: &'a str, pgid: Option<u32>) -> Self {
        Self { tool, pgid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard<'_> {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                Ok(()) => tracing::debug!(tool = self.tool, pgid, "Killed tool process group"),
                Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!(
                    tool = self.tool,
                    pgid,
                    error = %e,
                    "Could not kill tool process group"
                ),
            }
        }
        #[cfg(not(unix))]
        tracing::debug!(tool = self.tool, pgid, "Tool dropped before exit");
    }
}

/// Truncate to at most `max` bytes on a char boundary, noting the original size
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...\n[truncated at {} bytes]", &s[..end], s.len())
}

/// Last non-empty lines of a tool's stderr/stdout, for error messages
pub fn tail(text: &str, lines: usize) -> String {
    let kept: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join("\n")
}

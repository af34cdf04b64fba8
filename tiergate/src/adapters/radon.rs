//! Radon adapter: cyclomatic complexity
//!
//! `radon cc --json -s .` from the workspace root. Output maps each file to a
//! list of blocks, or to `{"error": ...}` when radon could not parse it.
//! Counts are cumulative per threshold: a function at 45 counts toward
//! `unmaintainable`, `very_high` and `high`.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{run_tool, tail, InvocationContext, ParsedOutput, RawOutput, ToolAdapter};
use crate::error::{GateError, GateResult};
use crate::report::{Finding, Severity};
use crate::workspace::VENDORED_DIRS;

const TOOL: &str = "radon";

pub const UNMAINTAINABLE_AT: u64 = 41;
pub const VERY_HIGH_AT: u64 = 21;
pub const HIGH_AT: u64 = 11;

/// Worst offenders named in suggestions
const SUGGEST_TOP: usize = 5;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileEntry {
    Blocks(Vec<Block>),
    Error { error: String },
}

#[derive(Debug, Deserialize)]
struct Block {
    #[serde(rename = "type", default)]
    kind: String,
    name: String,
    complexity: u64,
    #[serde(default)]
    lineno: Option<u64>,
    #[serde(default)]
    classname: Option<String>,
}

impl Block {
    fn qualified_name(&self) -> String {
        match &self.classname {
            Some(class) if !class.is_empty() => format!("{class}.{}", self.name),
            _ => self.name.clone(),
        }
    }
}

/// Radon's letter rank for a complexity score
pub fn rank(complexity: u64) -> char {
    match complexity {
        0..=5 => 'A',
        6..=10 => 'B',
        11..=20 => 'C',
        21..=30 => 'D',
        31..=40 => 'E',
        _ => 'F',
    }
}

/// Runs `radon cc` over the workspace
#[derive(Debug, Default)]
pub struct RadonAdapter;

impl RadonAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolAdapter for RadonAdapter {
    fn tool(&self) -> &str {
        TOOL
    }

    async fn invoke(&self, ctx: &InvocationContext) -> GateResult<RawOutput> {
        let ignore = VENDORED_DIRS.join(",");

        let mut cmd = tokio::process::Command::new(TOOL);
        cmd.args(["cc", "--json", "-s", "--ignore"])
            .arg(ignore)
            .arg(".");

        let output = run_tool(&mut cmd, TOOL, &ctx.workspace).await?;
        let raw = RawOutput::from_output(&output);
        if raw.exit_code != Some(0) {
            return Err(GateError::execution(TOOL, raw.exit_code, tail(&raw.stderr, 20)));
        }
        Ok(raw)
    }

    fn parse(&self, raw: &RawOutput, ctx: &InvocationContext) -> GateResult<ParsedOutput> {
        let files: BTreeMap<String, FileEntry> = serde_json::from_str(raw.stdout.trim())
            .map_err(|e| GateError::parse(TOOL, e.to_string()))?;

        let mut parsed = ParsedOutput::default();
        let (mut functions, mut unmaintainable, mut very_high, mut high) = (0u64, 0, 0, 0);
        let mut file_errors = Vec::new();
        let mut offenders: Vec<(u64, String)> = Vec::new();

        for (path, entry) in &files {
            let file = ctx.display_path(path.trim_start_matches("./"));
            let blocks = match entry {
                FileEntry::Blocks(blocks) => blocks,
                FileEntry::Error { error } => {
                    file_errors.push(format!("{file}: {error}"));
                    continue;
                }
            };

            // Methods are listed as their own blocks; classes only aggregate them
            for block in blocks.iter().filter(|b| b.kind != "class") {
                functions += 1;
                let cc = block.complexity;
                if cc >= UNMAINTAINABLE_AT {
                    unmaintainable += 1;
                }
                if cc >= VERY_HIGH_AT {
                    very_high += 1;
                    let name = block.qualified_name();
                    let severity = if cc >= UNMAINTAINABLE_AT {
                        Severity::Critical
                    } else {
                        Severity::High
                    };
                    parsed.findings.push(
                        Finding::new(
                            format!("complexity_{}", rank(cc)),
                            format!("{name} has cyclomatic complexity {cc}"),
                            severity,
                        )
                        .at(&file, block.lineno),
                    );
                    offenders.push((cc, format!("{file}::{name}")));
                }
                if cc >= HIGH_AT {
                    high += 1;
                }
            }
        }

        offenders.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        for (cc, name) in offenders.iter().take(SUGGEST_TOP) {
            parsed
                .suggestions
                .push(format!("Split {name} (complexity {cc}) into smaller functions"));
        }
        if offenders.len() > SUGGEST_TOP {
            parsed.suggestions.push(format!(
                "{} more function(s) at complexity >= {VERY_HIGH_AT}",
                offenders.len() - SUGGEST_TOP
            ));
        }

        parsed.count("functions", functions);
        parsed.count("unmaintainable", unmaintainable);
        parsed.count("very_high", very_high);
        parsed.count("high", high);
        parsed.count("files_with_errors", file_errors.len() as u64);
        parsed.detail("files", files.len() as u64);
        if !file_errors.is_empty() {
            parsed.detail("file_errors", file_errors);
        }

        Ok(parsed)
    }
}

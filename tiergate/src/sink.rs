//! Report Sink: persist the report, remember the run, push it upstream
//!
//! The report file is written atomically (temp file + rename) so CI never
//! reads a half-written document. The history file and the collector push are
//! best-effort: their failures are logged and returned, never raised.

use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::GateConfig;
use crate::error::{GateError, GateResult};
use crate::registry::BENCHMARKS;
use crate::report::{CheckStatus, Report, ReportSummary};

/// Outcome of the optional collector push
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryStatus {
    NotConfigured,
    Delivered,
    Failed { reason: String },
}

/// What the sink managed to do with one report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOutcome {
    pub report_path: PathBuf,
    pub history_appended: bool,
    pub delivery: DeliveryStatus,
}

/// One line of the run history
#[derive(Debug, Serialize)]
struct HistoryLine<'a> {
    run_id: String,
    timestamp: String,
    workspace: &'a str,
    status: CheckStatus,
    duration_ms: u64,
    summary: ReportSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    interrupted: Option<&'a str>,
}

/// Writes reports to their fixed location and optionally to a collector
#[derive(Debug, Clone)]
pub struct ReportSink {
    report_path: PathBuf,
    history_path: PathBuf,
    collector_url: Option<String>,
    push_timeout: Duration,
}

impl ReportSink {
    pub fn new(config: &GateConfig) -> Self {
        Self {
            report_path: config.report_path.clone(),
            history_path: config.history_path(),
            collector_url: config.collector_url.clone(),
            push_timeout: Duration::from_secs(config.push_timeout_secs),
        }
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    /// Write the report, append history, push to the collector
    pub async fn deliver(&self, report: &Report) -> GateResult<SinkOutcome> {
        let report_path = self.write(report)?;
        let history_appended = self.append_history(report);
        let delivery = self.push(report).await;
        Ok(SinkOutcome {
            report_path,
            history_appended,
            delivery,
        })
    }

    /// Pretty JSON at the report path, replaced atomically
    pub fn write(&self, report: &Report) -> GateResult<PathBuf> {
        let json = serde_json::to_string_pretty(report)?;
        if let Some(parent) = self.report_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.report_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.report_path)?;

        info!(path = %self.report_path.display(), status = %report.status, "Wrote report");
        Ok(self.report_path.clone())
    }

    /// Append one compact line to the JSONL history; false on any failure
    fn append_history(&self, report: &Report) -> bool {
        let line = HistoryLine {
            run_id: report.run_id.to_string(),
            timestamp: report.timestamp.to_rfc3339(),
            workspace: &report.workspace,
            status: report.status,
            duration_ms: report.duration_ms,
            summary: report.summary,
            interrupted: report.interrupted.as_deref(),
        };
        let json = match serde_json::to_string(&line) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize history line: {e}");
                return false;
            }
        };

        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)
        {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{json}") {
                    warn!("Failed to append run history: {e}");
                    return false;
                }
                true
            }
            Err(e) => {
                warn!("Failed to open run history {}: {e}", self.history_path.display());
                false
            }
        }
    }

    /// Best-effort POST of the report JSON to the collector
    pub async fn push(&self, report: &Report) -> DeliveryStatus {
        let Some(url) = &self.collector_url else {
            return DeliveryStatus::NotConfigured;
        };

        let result = async {
            let client = reqwest::Client::builder()
                .timeout(self.push_timeout)
                .build()?;
            client
                .post(url)
                .json(report)
                .send()
                .await?
                .error_for_status()?;
            Ok::<(), GateError>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(url = %url, "Pushed report to collector");
                DeliveryStatus::Delivered
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Collector push failed");
                DeliveryStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Copy the benchmark baseline candidate of `report` to `dest`.
///
/// Returns `Ok(None)` when the run produced no candidate (benchmarks skipped,
/// failed, or already compared against a baseline).
pub fn save_baseline(report: &Report, dest: &Path) -> GateResult<Option<PathBuf>> {
    let Some(candidate) = report
        .check(BENCHMARKS.as_str())
        .and_then(|c| c.details.get("baseline_candidate"))
        .and_then(|v| v.as_str())
    else {
        return Ok(None);
    };

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(candidate, dest).map_err(|e| {
        GateError::config(format!(
            "cannot save baseline {candidate} to {}: {e}",
            dest.display()
        ))
    })?;
    info!(path = %dest.display(), "Saved benchmark baseline");
    Ok(Some(dest.to_path_buf()))
}

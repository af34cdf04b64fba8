//! Console rendering. Presentation only; the JSON report is the record.

use std::fmt::Write;

use tiergate::{CheckListing, DeliveryStatus, Report, SinkOutcome};

/// Findings shown under a failing or warning check
const MAX_FINDINGS_SHOWN: usize = 3;

/// Per-check lines, a few findings for non-passing checks, then the summary
pub fn render_report(report: &Report, sink: Option<&SinkOutcome>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Deep tier run {} on {}", report.run_id, report.workspace);

    for check in &report.checks {
        let _ = writeln!(out, "  {}", check.console_line());
        if check.status.is_blocking() || check.status == tiergate::CheckStatus::Warn {
            for finding in check.findings.iter().take(MAX_FINDINGS_SHOWN) {
                let location = match (&finding.file, finding.line) {
                    (Some(file), Some(line)) => format!("{file}:{line}: "),
                    (Some(file), None) => format!("{file}: "),
                    _ => String::new(),
                };
                let _ = writeln!(out, "      {location}{}", finding.message);
            }
            if check.findings.len() > MAX_FINDINGS_SHOWN {
                let _ = writeln!(
                    out,
                    "      … {} more finding(s) in the report",
                    check.findings.len() - MAX_FINDINGS_SHOWN
                );
            }
        }
    }

    if let Some(reason) = &report.interrupted {
        let _ = writeln!(out, "  interrupted: {reason}");
    }
    let _ = writeln!(out, "{}", report.summary_line());

    if let Some(sink) = sink {
        let _ = writeln!(out, "Report: {}", sink.report_path.display());
        match &sink.delivery {
            DeliveryStatus::NotConfigured => {}
            DeliveryStatus::Delivered => {
                let _ = writeln!(out, "Collector: delivered");
            }
            DeliveryStatus::Failed { reason } => {
                let _ = writeln!(out, "Collector: not delivered ({reason})");
            }
        }
    }
    out
}

/// `--list` table
pub fn render_listing(listing: &[CheckListing]) -> String {
    let mut out = String::new();
    for row in listing {
        let verdict = match &row.skip_reason {
            None => "runs".to_string(),
            Some(reason) => format!("skip: {reason}"),
        };
        let _ = writeln!(
            out,
            "{:<18} {:<22} {:<8} {:>5}s  {}",
            row.id.as_str(),
            row.category.to_string(),
            row.tool,
            row.default_timeout_secs,
            verdict
        );
    }
    out
}

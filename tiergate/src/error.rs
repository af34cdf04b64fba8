//! Gate error types
//!
//! One enum for every failure the engine can observe. Check-scoped variants
//! (`ToolUnavailable`, `ToolExecution`, `Parse`, `Timeout`, `Cancelled`) never
//! escape the runner: they are folded into that check's `CheckResult`.
//! Engine-scoped variants abort a run before any check executes.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gate operations
pub type GateResult<T> = Result<T, GateError>;

/// Errors that can occur while selecting, running, or reporting checks
#[derive(Error, Debug)]
pub enum GateError {
    /// No applicable sources, or the analyzer binary is not installed
    #[error("Tool unavailable: {reason}")]
    ToolUnavailable { reason: String },

    /// Analyzer exited unexpectedly or could not be spawned
    #[error("{tool} failed (exit={exit_code:?}): {message}")]
    ToolExecution {
        tool: String,
        exit_code: Option<i32>,
        message: String,
    },

    /// Analyzer output could not be understood
    #[error("Could not parse {tool} output: {message}")]
    Parse { tool: String, message: String },

    /// Per-check or global time budget elapsed while the tool was running
    #[error("Timed out after {}", format_limit(.ms))]
    Timeout { ms: u64 },

    /// The run was cancelled while the tool was running
    #[error("Cancelled: {reason}")]
    Cancelled { reason: String },

    /// Workspace path is missing or not a directory
    #[error("Invalid workspace {path}: {message}")]
    InvalidWorkspace { path: PathBuf, message: String },

    /// Run mode names a check that is not registered
    #[error("Unknown check '{name}' (expected 'all' or one of: {valid})")]
    UnknownCheck { name: String, valid: String },

    /// A check id was registered or recorded twice
    #[error("Duplicate check id: {id}")]
    DuplicateCheck { id: String },

    /// Run lifecycle moved out of order
    #[error("Invalid run phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Configuration error (bad env value, bad policy file)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML policy file error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Collector push error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GateError {
    /// Create a tool-unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::ToolUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a tool execution error
    pub fn execution(
        tool: impl Into<String>,
        exit_code: Option<i32>,
        message: impl Into<String>,
    ) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            exit_code,
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid workspace error
    pub fn invalid_workspace(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidWorkspace {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Machine-readable code, stored in `CheckResult.details.error_code`
    pub fn code(&self) -> &'static str {
        match self {
            Self::ToolUnavailable { .. } => "TOOL_UNAVAILABLE",
            Self::ToolExecution { .. } => "TOOL_EXECUTION_FAILURE",
            Self::Parse { .. } => "UNPARSEABLE_OUTPUT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled { .. } => "RUN_CANCELLED",
            Self::InvalidWorkspace { .. } => "INVALID_WORKSPACE",
            Self::UnknownCheck { .. } => "UNKNOWN_CHECK",
            Self::DuplicateCheck { .. } => "DUPLICATE_CHECK",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Toml(_) => "TOML_ERROR",
            Self::Http(_) => "HTTP_ERROR",
        }
    }

    /// Exit code of the failed tool, when one was observed
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ToolExecution { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Whether this error means "skip" rather than "fail"
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ToolUnavailable { .. })
    }

    /// Whether this error is a timeout or an in-flight cancellation
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }
}

/// `90s` for whole seconds, `250ms` otherwise
pub fn format_limit(ms: &u64) -> String {
    let ms = *ms;
    if ms >= 1000 && ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(GateError::unavailable("x").code(), "TOOL_UNAVAILABLE");
        assert_eq!(
            GateError::execution("semgrep", Some(2), "boom").code(),
            "TOOL_EXECUTION_FAILURE"
        );
        assert_eq!(GateError::parse("radon", "bad").code(), "UNPARSEABLE_OUTPUT");
        assert_eq!(GateError::Timeout { ms: 3000 }.code(), "TIMEOUT");
    }

    #[test]
    fn test_execution_error_display_includes_exit_code() {
        let err = GateError::execution("infer", Some(3), "capture failed");
        assert_eq!(err.to_string(), "infer failed (exit=Some(3)): capture failed");
        assert_eq!(err.exit_code(), Some(3));
    }

    #[test]
    fn test_classification_helpers() {
        assert!(GateError::unavailable("no sources").is_unavailable());
        assert!(GateError::Timeout { ms: 1000 }.is_timeout());
        assert!(GateError::Cancelled {
            reason: "interrupt".into()
        }
        .is_timeout());
        assert!(!GateError::parse("pytest", "?").is_timeout());
        assert_eq!(
            GateError::Timeout { ms: 250 }.to_string(),
            "Timed out after 250ms"
        );
        assert_eq!(
            GateError::Timeout { ms: 600_000 }.to_string(),
            "Timed out after 600s"
        );
    }
}

//! Diagnostic reporting
//!
//! The preprocessor reports findings through a polymorphic sink so that
//! different front-ends (CLI, tests, a larger analysis driver) can collect
//! or render them as they see fit.

use crate::location::Location;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Information,
    Debug,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Information => write!(f, "information"),
            Severity::Debug => write!(f, "debug"),
        }
    }
}

/// A single reported finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stable identifier, e.g. `missingInclude` or `syntaxError`
    pub id: String,
    pub location: Location,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        id: impl Into<String>,
        location: Location,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            id: id.into(),
            location,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} [{}] {}",
            self.location, self.severity, self.id, self.message
        )
    }
}

/// Sink for diagnostics and progress events
pub trait DiagnosticSink: Send + Sync {
    /// Report a finding
    fn report(&self, diagnostic: Diagnostic);

    /// Report progress of a long-running pass. Default: ignore.
    fn report_progress(&self, _file: &str, _phase: &str, _percent: u32) {}
}

/// Sink that buffers diagnostics for later inspection
#[derive(Debug, Default)]
pub struct CollectSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All diagnostics reported so far
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().unwrap().clone()
    }

    /// True if any diagnostic with the given id was reported
    pub fn has_id(&self, id: &str) -> bool {
        self.diagnostics.lock().unwrap().iter().any(|d| d.id == id)
    }
}

impl DiagnosticSink for CollectSink {
    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().unwrap().push(diagnostic);
    }
}

/// Sink that forwards diagnostics to the `tracing` subscriber
#[derive(Debug, Default)]
pub struct TraceSink;

impl DiagnosticSink for TraceSink {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => tracing::warn!(target: "cfgsight", "{}", diagnostic),
            Severity::Information => tracing::info!(target: "cfgsight", "{}", diagnostic),
            Severity::Debug => tracing::debug!(target: "cfgsight", "{}", diagnostic),
        }
    }
}

//! CfgSight Core
//!
//! Core types and interfaces for the CfgSight preprocessor front-end.

pub mod diagnostics;
pub mod error;
pub mod location;
pub mod settings;

pub use diagnostics::{CollectSink, Diagnostic, DiagnosticSink, Severity, TraceSink};
pub use error::{Error, Result};
pub use location::{Location, ProvenanceStack};
pub use settings::{Features, Settings, Suppression, Suppressions};

//! Error types for CfgSight

use thiserror::Error;

/// CfgSight error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Macro expansion error: {0}")]
    Expansion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for CfgSight
pub type Result<T> = std::result::Result<T, Error>;

//! CLI error types

use kforward_core::CoreError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Output error: {0}")]
    OutputError(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl CliError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CliError::InvalidArgument(_) => "CLI002",
            CliError::OutputError(_) => "CLI006",
            CliError::Core(e) => e.code(),
        }
    }
}

/// CLI-specific result type
pub type Result<T> = std::result::Result<T, CliError>;

//! Error types for the verification pipeline.
//!
//! Pipeline modules return [`PipelineError`]; the HTTP/file capabilities in
//! [`crate::tools`] return [`ToolError`], which converts into it. `main` keeps
//! the `Box<dyn Error>` surface.

use std::path::PathBuf;

use crate::api::LlmError;
use crate::orchestrator::RunState;
use crate::tools::ToolError;

/// Top-level error type for every pipeline operation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Settings or LLM configuration could not be loaded.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A crawl, search or file-read capability failed.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The LLM endpoint failed after the retry policy gave up.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// LLM output did not match the shape a step declared.
    #[error("schema violation in {schema}: {reason}")]
    SchemaViolation { schema: &'static str, reason: String },

    /// The run state machine was asked to move backwards or skip a state.
    #[error("invalid run transition {from:?} -> {to:?}")]
    InvalidTransition { from: RunState, to: RunState },

    /// Serializing an artifact failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn schema(schema: &'static str, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            schema,
            reason: reason.into(),
        }
    }
}

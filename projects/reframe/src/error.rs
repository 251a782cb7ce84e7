//! Error types for the frame pipeline.

use std::path::PathBuf;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Job-level failures. Unit-level transform errors never surface here; they are
/// recorded per unit in a `BatchReport` instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown processor: {0}")]
    UnknownTransform(String),

    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("No frames were extracted from {0}")]
    NoFramesExtracted(PathBuf),

    #[error("No units survived transformation (0/{total} frames processed)")]
    NoSurvivingUnits { total: usize },

    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("{tool} failed: {message}")]
    ToolFailed {
        tool: String,
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn tool_failed(
        tool: impl Into<String>,
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Whether the caller sent something unusable, as opposed to the job failing.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Config(_) | PipelineError::UnknownTransform(_)
        )
    }
}

//! Error types for Klipp.

use thiserror::Error;

/// Library-level error type for Klipp operations.
#[derive(Error, Debug)]
pub enum KlippError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Invalid transcript: {0}")]
    InvalidTranscript(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Inference timed out after {0} seconds")]
    InferenceTimeout(u64),

    #[error("Segment selection failed: {0}")]
    SelectionFailed(String),

    #[error("Render failed: {0}")]
    RenderFailed(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Interrupted")]
    Interrupted,

    #[error("Stage conflict: {0}")]
    StageConflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("External tool failed: {0}")]
    ToolFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl KlippError {
    /// Whether this error came from a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, KlippError::Cancelled)
    }

    /// Whether the store refused a stage change because another writer
    /// already moved the task.
    pub fn is_stage_conflict(&self) -> bool {
        matches!(self, KlippError::StageConflict(_))
    }
}

/// Result type alias for Klipp operations.
pub type Result<T> = std::result::Result<T, KlippError>;

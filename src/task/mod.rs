//! Tasks, their stages and the clips they produce.

mod machine;
mod progress;

pub use machine::{mark_interrupted, Collaborators, TaskMachine};
pub use progress::{ClipCounts, ProgressReporter, ProgressSnapshot};

use crate::selection::Segment;
use crate::source::SourceRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Position of a task in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Queued,
    Downloading,
    Transcribing,
    Selecting,
    Rendering,
    Completed,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Downloading => "downloading",
            Stage::Transcribing => "transcribing",
            Stage::Selecting => "selecting",
            Stage::Rendering => "rendering",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }

    /// Order in the pipeline. A task's rank never decreases.
    pub fn rank(&self) -> u8 {
        match self {
            Stage::Queued => 0,
            Stage::Downloading => 1,
            Stage::Transcribing => 2,
            Stage::Selecting => 3,
            Stage::Rendering => 4,
            Stage::Completed => 5,
            Stage::Failed => 6,
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    /// Whether a task may move from `self` to `next`.
    pub fn can_advance_to(&self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Stage::Failed => true,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Stage::Queued),
            "downloading" => Ok(Stage::Downloading),
            "transcribing" => Ok(Stage::Transcribing),
            "selecting" => Ok(Stage::Selecting),
            "rendering" => Ok(Stage::Rendering),
            "completed" => Ok(Stage::Completed),
            "failed" => Ok(Stage::Failed),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

/// One clip-generation job for a single source video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner: String,
    pub source: SourceRef,
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
    /// Clip ids in segment order.
    pub clip_ids: Vec<String>,
}

impl Task {
    pub fn new(source: SourceRef, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            owner: owner.into(),
            source,
            stage: Stage::Queued,
            created_at: now,
            updated_at: now,
            error: None,
            clip_ids: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// Outcome of rendering one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    Rendered,
    Failed,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::Rendered => "rendered",
            ClipStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ClipStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rendered" => Ok(ClipStatus::Rendered),
            "failed" => Ok(ClipStatus::Failed),
            _ => Err(format!("Unknown clip status: {}", s)),
        }
    }
}

/// A rendered (or failed) clip. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: String,
    pub task_id: TaskId,
    /// Position of the segment in the selection.
    pub segment_index: usize,
    pub segment: Segment,
    /// Output file; absent when rendering failed.
    pub path: Option<PathBuf>,
    pub duration: f64,
    pub status: ClipStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Clip {
    pub fn rendered(task_id: TaskId, segment_index: usize, segment: Segment, path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id,
            segment_index,
            duration: segment.duration(),
            segment,
            path: Some(path),
            status: ClipStatus::Rendered,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(
        task_id: TaskId,
        segment_index: usize,
        segment: Segment,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id,
            segment_index,
            duration: segment.duration(),
            segment,
            path: None,
            status: ClipStatus::Failed,
            error: Some(error.into()),
            created_at: Utc::now(),
        }
    }

    pub fn is_rendered(&self) -> bool {
        self.status == ClipStatus::Rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_transitions() {
        assert!(Stage::Queued.can_advance_to(Stage::Downloading));
        assert!(Stage::Selecting.can_advance_to(Stage::Rendering));
        assert!(Stage::Rendering.can_advance_to(Stage::Completed));
        assert!(Stage::Downloading.can_advance_to(Stage::Failed));

        assert!(!Stage::Queued.can_advance_to(Stage::Transcribing));
        assert!(!Stage::Rendering.can_advance_to(Stage::Selecting));
        assert!(!Stage::Completed.can_advance_to(Stage::Failed));
        assert!(!Stage::Failed.can_advance_to(Stage::Failed));
    }

    #[test]
    fn test_stage_roundtrip() {
        for stage in [
            Stage::Queued,
            Stage::Downloading,
            Stage::Transcribing,
            Stage::Selecting,
            Stage::Rendering,
            Stage::Completed,
            Stage::Failed,
        ] {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::new();
        assert_eq!(id.to_string().parse::<TaskId>().unwrap(), id);
        assert!("nope".parse::<TaskId>().is_err());
    }
}

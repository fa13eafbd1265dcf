//! Task persistence for Klipp.
//!
//! Provides a trait-based interface over where tasks, clips and progress
//! snapshots live.

mod memory;
mod sqlite;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use crate::config::Settings;
use crate::error::{KlippError, Result};
use crate::task::{Clip, ProgressSnapshot, Stage, Task, TaskId};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for task store implementations.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task.
    async fn create_task(&self, task: &Task) -> Result<()>;

    /// Set a task's stage and error, returning the updated task.
    ///
    /// Refused with `StageConflict` unless the stored stage may advance to
    /// `stage`, so a settled task is never revived by a late writer.
    async fn update_stage(&self, id: TaskId, stage: Stage, error: Option<&str>) -> Result<Task>;

    /// Record a finished clip and append its id to the task. Refused with
    /// `StageConflict` once the task is terminal.
    async fn append_clip(&self, clip: &Clip) -> Result<()>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>>;

    /// All clips of a task, in segment order.
    async fn list_clips(&self, id: TaskId) -> Result<Vec<Clip>>;

    /// Store a snapshot unless a newer or terminal one is already stored.
    async fn save_snapshot(&self, snapshot: &ProgressSnapshot) -> Result<()>;

    async fn get_snapshot(&self, id: TaskId) -> Result<Option<ProgressSnapshot>>;

    /// All tasks, newest first.
    async fn list_tasks(&self) -> Result<Vec<Task>>;
}

/// Open the store configured in `settings`.
pub fn open(settings: &Settings) -> Result<Arc<dyn TaskStore>> {
    match settings.store.provider.as_str() {
        "sqlite" => Ok(Arc::new(SqliteTaskStore::new(&settings.sqlite_path())?)),
        "memory" => Ok(Arc::new(MemoryTaskStore::new())),
        other => Err(KlippError::Config(format!("Unknown store provider: {}", other))),
    }
}

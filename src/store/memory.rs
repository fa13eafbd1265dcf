//! In-memory task store implementation.
//!
//! Useful for testing and one-shot runs.

use super::TaskStore;
use crate::error::{KlippError, Result};
use crate::task::{Clip, ProgressSnapshot, Stage, Task, TaskId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    clips: HashMap<TaskId, Vec<Clip>>,
    snapshots: HashMap<TaskId, ProgressSnapshot>,
}

/// In-memory task store.
pub struct MemoryTaskStore {
    inner: RwLock<Inner>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| KlippError::Store(format!("Failed to acquire lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| KlippError::Store(format!("Failed to acquire lock: {}", e)))
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        self.write()?.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update_stage(&self, id: TaskId, stage: Stage, error: Option<&str>) -> Result<Task> {
        let mut inner = self.write()?;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| KlippError::TaskNotFound(id.to_string()))?;
        if !task.stage.can_advance_to(stage) {
            return Err(KlippError::StageConflict(format!(
                "task {} is {}, cannot move to {}",
                id, task.stage, stage
            )));
        }
        task.stage = stage;
        task.error = error.map(str::to_string);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn append_clip(&self, clip: &Clip) -> Result<()> {
        let mut inner = self.write()?;
        let task = inner
            .tasks
            .get_mut(&clip.task_id)
            .ok_or_else(|| KlippError::TaskNotFound(clip.task_id.to_string()))?;
        if task.is_terminal() {
            return Err(KlippError::StageConflict(format!(
                "task {} is {}, no more clips accepted",
                clip.task_id, task.stage
            )));
        }
        task.clip_ids.push(clip.id.clone());
        task.updated_at = Utc::now();

        let clips = inner.clips.entry(clip.task_id).or_default();
        clips.push(clip.clone());
        clips.sort_by_key(|c| c.segment_index);
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.read()?.tasks.get(&id).cloned())
    }

    async fn list_clips(&self, id: TaskId) -> Result<Vec<Clip>> {
        Ok(self.read()?.clips.get(&id).cloned().unwrap_or_default())
    }

    async fn save_snapshot(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        let mut inner = self.write()?;
        let keep_stored = inner
            .snapshots
            .get(&snapshot.task_id)
            .is_some_and(|s| s.is_terminal() || s.sequence >= snapshot.sequence);
        if !keep_stored {
            inner.snapshots.insert(snapshot.task_id, snapshot.clone());
        }
        Ok(())
    }

    async fn get_snapshot(&self, id: TaskId) -> Result<Option<ProgressSnapshot>> {
        Ok(self.read()?.snapshots.get(&id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.read()?.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::Segment;
    use crate::source::SourceRef;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryTaskStore::new();
        let task = Task::new(SourceRef::Url("https://example.com/v".into()), "alice");
        store.create_task(&task).await.unwrap();

        let updated = store
            .update_stage(task.id, Stage::Downloading, None)
            .await
            .unwrap();
        assert_eq!(updated.stage, Stage::Downloading);

        let second = Clip::failed(task.id, 1, Segment::new(50.0, 90.0, "b"), "boom");
        let first = Clip::rendered(task.id, 0, Segment::new(0.0, 40.0, "a"), PathBuf::from("a.mp4"));
        store.append_clip(&second).await.unwrap();
        store.append_clip(&first).await.unwrap();

        let clips = store.list_clips(task.id).await.unwrap();
        assert_eq!(clips[0].segment_index, 0);
        assert_eq!(clips[1].segment_index, 1);
        assert_eq!(store.get_task(task.id).await.unwrap().unwrap().clip_ids.len(), 2);

        let missing = store.update_stage(TaskId::new(), Stage::Failed, None).await;
        assert!(matches!(missing, Err(KlippError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_terminal_task_refuses_further_writes() {
        let store = MemoryTaskStore::new();
        let task = Task::new(SourceRef::Url("https://example.com/v".into()), "bob");
        store.create_task(&task).await.unwrap();

        let skip = store.update_stage(task.id, Stage::Selecting, None).await;
        assert!(matches!(skip, Err(KlippError::StageConflict(_))));

        store.update_stage(task.id, Stage::Downloading, None).await.unwrap();
        store
            .update_stage(task.id, Stage::Failed, Some("Interrupted"))
            .await
            .unwrap();

        let revived = store.update_stage(task.id, Stage::Transcribing, None).await;
        assert!(matches!(revived, Err(KlippError::StageConflict(_))));
        let late = Clip::rendered(task.id, 0, Segment::new(0.0, 40.0, "a"), PathBuf::from("a.mp4"));
        assert!(matches!(
            store.append_clip(&late).await,
            Err(KlippError::StageConflict(_))
        ));

        let stored = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::Failed);
        assert_eq!(stored.error.as_deref(), Some("Interrupted"));
        assert!(stored.clip_ids.is_empty());
    }
}

//! SQLite-based task store implementation.

use super::TaskStore;
use crate::error::{KlippError, Result};
use crate::task::{Clip, ClipStatus, ProgressSnapshot, Stage, Task, TaskId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    source_json TEXT NOT NULL,
    stage TEXT NOT NULL,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at);

CREATE TABLE IF NOT EXISTS clips (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES tasks(id),
    segment_index INTEGER NOT NULL,
    segment_json TEXT NOT NULL,
    path TEXT,
    duration REAL NOT NULL,
    status TEXT NOT NULL,
    error TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(task_id, segment_index)
);

CREATE INDEX IF NOT EXISTS idx_clips_task_id ON clips(task_id);

CREATE TABLE IF NOT EXISTS snapshots (
    task_id TEXT PRIMARY KEY REFERENCES tasks(id),
    sequence INTEGER NOT NULL,
    terminal INTEGER NOT NULL DEFAULT 0,
    snapshot_json TEXT NOT NULL
);
"#;

/// How long a writer waits for another process's transaction.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based task store.
///
/// File-backed stores keep a second, query-only connection so progress
/// polls do not queue behind the runner's writes.
pub struct SqliteTaskStore {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// Open (or create) a store at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets the CLI read while a server process writes.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;

        let reader = Connection::open(path)?;
        reader.execute_batch("PRAGMA query_only = ON;")?;
        reader.busy_timeout(BUSY_TIMEOUT)?;

        info!("Initialized SQLite task store at {:?}", path);

        Ok(Self {
            writer: Mutex::new(conn),
            reader: Some(Mutex::new(reader)),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            writer: Mutex::new(conn),
            reader: None,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        acquire(&self.writer)
    }

    fn read(&self) -> Result<MutexGuard<'_, Connection>> {
        match &self.reader {
            Some(reader) => acquire(reader),
            None => self.lock(),
        }
    }

    fn load_task(conn: &Connection, id: TaskId) -> Result<Option<Task>> {
        let row = conn
            .query_row(
                "SELECT id, owner, source_json, stage, error, created_at, updated_at
                 FROM tasks WHERE id = ?1",
                params![id.to_string()],
                TaskRow::from_row,
            )
            .optional()?;

        match row {
            Some(row) => {
                let clip_ids = Self::clip_ids(conn, id)?;
                Ok(Some(row.into_task(clip_ids)?))
            }
            None => Ok(None),
        }
    }

    fn clip_ids(conn: &Connection, id: TaskId) -> Result<Vec<String>> {
        let mut stmt =
            conn.prepare("SELECT id FROM clips WHERE task_id = ?1 ORDER BY segment_index")?;
        let ids = stmt
            .query_map(params![id.to_string()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

/// Raw column values of a `tasks` row.
struct TaskRow {
    id: String,
    owner: String,
    source_json: String,
    stage: String,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            source_json: row.get(2)?,
            stage: row.get(3)?,
            error: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_task(self, clip_ids: Vec<String>) -> Result<Task> {
        Ok(Task {
            id: self
                .id
                .parse()
                .map_err(|e| KlippError::Store(format!("Bad task id {}: {}", self.id, e)))?,
            owner: self.owner,
            source: serde_json::from_str(&self.source_json)?,
            stage: self.stage.parse().map_err(KlippError::Store)?,
            error: self.error,
            created_at: parse_time(&self.created_at),
            updated_at: parse_time(&self.updated_at),
            clip_ids,
        })
    }
}

fn acquire(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| KlippError::Store(format!("Failed to acquire lock: {}", e)))
}

fn stage_conflict(id: TaskId, current: Stage, wanted: &str) -> KlippError {
    KlippError::StageConflict(format!("task {} is {}, {}", id, current, wanted))
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn stored_stage(conn: &Connection, id: TaskId) -> Result<Stage> {
    let stage: Option<String> = conn
        .query_row(
            "SELECT stage FROM tasks WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    stage
        .ok_or_else(|| KlippError::TaskNotFound(id.to_string()))?
        .parse()
        .map_err(KlippError::Store)
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[instrument(skip_all, fields(task_id = %task.id))]
    async fn create_task(&self, task: &Task) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (id, owner, source_json, stage, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.id.to_string(),
                task.owner,
                serde_json::to_string(&task.source)?,
                task.stage.as_str(),
                task.error,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        debug!("Created task");
        Ok(())
    }

    #[instrument(skip(self, error), fields(task_id = %id))]
    async fn update_stage(&self, id: TaskId, stage: Stage, error: Option<&str>) -> Result<Task> {
        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front, so the stage check and
        // the update are atomic across processes sharing the file.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = stored_stage(&tx, id)?;
        if !current.can_advance_to(stage) {
            return Err(stage_conflict(id, current, &format!("cannot move to {}", stage)));
        }

        tx.execute(
            "UPDATE tasks SET stage = ?2, error = ?3, updated_at = ?4 WHERE id = ?1",
            params![id.to_string(), stage.as_str(), error, Utc::now().to_rfc3339()],
        )?;
        let task = Self::load_task(&tx, id)?.ok_or_else(|| KlippError::TaskNotFound(id.to_string()))?;
        tx.commit()?;

        debug!("Stage {} -> {}", current, stage);
        Ok(task)
    }

    #[instrument(skip_all, fields(task_id = %clip.task_id, index = clip.segment_index))]
    async fn append_clip(&self, clip: &Clip) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = stored_stage(&tx, clip.task_id)?;
        if current.is_terminal() {
            return Err(stage_conflict(clip.task_id, current, "no more clips accepted"));
        }
        tx.execute(
            "UPDATE tasks SET updated_at = ?2 WHERE id = ?1",
            params![clip.task_id.to_string(), Utc::now().to_rfc3339()],
        )?;

        tx.execute(
            "INSERT INTO clips (id, task_id, segment_index, segment_json, path, duration, status, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                clip.id,
                clip.task_id.to_string(),
                clip.segment_index as i64,
                serde_json::to_string(&clip.segment)?,
                clip.path.as_ref().map(|p| p.to_string_lossy().to_string()),
                clip.duration,
                clip.status.as_str(),
                clip.error,
                clip.created_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let conn = self.read()?;
        Self::load_task(&conn, id)
    }

    async fn list_clips(&self, id: TaskId) -> Result<Vec<Clip>> {
        let conn = self.read()?;
        let mut stmt = conn.prepare(
            "SELECT id, segment_index, segment_json, path, duration, status, error, created_at
             FROM clips WHERE task_id = ?1 ORDER BY segment_index",
        )?;

        let rows = stmt
            .query_map(params![id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(clip_id, index, segment_json, path, duration, status, error, created_at)| -> Result<Clip> {
                Ok(Clip {
                    id: clip_id,
                    task_id: id,
                    segment_index: index.max(0) as usize,
                    segment: serde_json::from_str(&segment_json)?,
                    path: path.map(PathBuf::from),
                    duration,
                    status: status.parse::<ClipStatus>().map_err(KlippError::Store)?,
                    error,
                    created_at: parse_time(&created_at),
                })
            })
            .collect()
    }

    async fn save_snapshot(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO snapshots (task_id, sequence, terminal, snapshot_json) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(task_id) DO UPDATE SET
                 sequence = excluded.sequence,
                 terminal = excluded.terminal,
                 snapshot_json = excluded.snapshot_json
             WHERE excluded.sequence > snapshots.sequence AND snapshots.terminal = 0",
            params![
                snapshot.task_id.to_string(),
                snapshot.sequence as i64,
                snapshot.is_terminal(),
                serde_json::to_string(snapshot)?,
            ],
        )?;
        Ok(())
    }

    async fn get_snapshot(&self, id: TaskId) -> Result<Option<ProgressSnapshot>> {
        let conn = self.read()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT snapshot_json FROM snapshots WHERE task_id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.read()?;
        let mut stmt = conn.prepare(
            "SELECT id, owner, source_json, stage, error, created_at, updated_at
             FROM tasks ORDER BY created_at DESC",
        )?;

        let rows = stmt
            .query_map([], TaskRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let id: TaskId = row
                .id
                .parse()
                .map_err(|e| KlippError::Store(format!("Bad task id {}: {}", row.id, e)))?;
            let clip_ids = Self::clip_ids(&conn, id)?;
            tasks.push(row.into_task(clip_ids)?);
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::Segment;
    use crate::source::SourceRef;
    use crate::task::{mark_interrupted, ClipCounts, ProgressReporter};

    #[tokio::test]
    async fn test_sqlite_task_store_roundtrip() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let task = Task::new(SourceRef::LocalFile("/videos/talk.mp4".into()), "carol");
        store.create_task(&task).await.unwrap();

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.source, task.source);
        assert_eq!(loaded.stage, Stage::Queued);

        store.update_stage(task.id, Stage::Downloading, None).await.unwrap();
        let failed = store
            .update_stage(task.id, Stage::Failed, Some("Cancelled"))
            .await
            .unwrap();
        assert_eq!(failed.error.as_deref(), Some("Cancelled"));

        let rendered = Clip::rendered(
            task.id,
            1,
            Segment::new(60.0, 100.0, "second").with_score(0.5),
            PathBuf::from("/out/clip_02.mp4"),
        );
        let broken = Clip::failed(task.id, 0, Segment::new(0.0, 40.0, "first"), "ffmpeg exploded");
        store.append_clip(&rendered).await.unwrap();
        store.append_clip(&broken).await.unwrap();

        let clips = store.list_clips(task.id).await.unwrap();
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].status, ClipStatus::Failed);
        assert_eq!(clips[0].error.as_deref(), Some("ffmpeg exploded"));
        assert_eq!(clips[1].segment, rendered.segment);
        assert_eq!(clips[1].path, rendered.path);

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.clip_ids, vec![broken.id.clone(), rendered.id.clone()]);
        assert_eq!(store.list_tasks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_never_regresses() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let mut task = Task::new(SourceRef::Url("https://example.com/v".into()), "dan");
        store.create_task(&task).await.unwrap();

        let first = ProgressReporter::snapshot(&task, ClipCounts::default(), None);
        task.stage = Stage::Downloading;
        let second = ProgressReporter::snapshot(&task, ClipCounts::default(), Some(&first));

        store.save_snapshot(&second).await.unwrap();
        store.save_snapshot(&first).await.unwrap();

        let stored = store.get_snapshot(task.id).await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::Downloading);
        assert_eq!(stored.sequence, second.sequence);
    }

    #[tokio::test]
    async fn test_missing_task() {
        let store = SqliteTaskStore::in_memory().unwrap();
        assert!(store.get_task(TaskId::new()).await.unwrap().is_none());
        let err = store.update_stage(TaskId::new(), Stage::Failed, None).await;
        assert!(matches!(err, Err(KlippError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_interrupted_task_stays_failed_across_stores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");
        let runner = SqliteTaskStore::new(&path).unwrap();
        let observer = SqliteTaskStore::new(&path).unwrap();

        let task = Task::new(SourceRef::Url("https://example.com/v".into()), "erin");
        runner.create_task(&task).await.unwrap();
        let mut running = task.clone();
        let mut last = ProgressReporter::snapshot(&running, ClipCounts::default(), None);
        for stage in [Stage::Downloading, Stage::Transcribing, Stage::Selecting] {
            running = runner.update_stage(task.id, stage, None).await.unwrap();
            last = ProgressReporter::snapshot(&running, ClipCounts::default(), Some(&last));
            runner.save_snapshot(&last).await.unwrap();
        }

        let interrupted = mark_interrupted(&observer, task.id).await.unwrap();
        assert_eq!(interrupted.stage, Stage::Failed);

        let late = runner.update_stage(task.id, Stage::Rendering, None).await;
        assert!(matches!(late, Err(KlippError::StageConflict(_))));
        let clip = Clip::rendered(task.id, 0, Segment::new(0.0, 40.0, "a"), PathBuf::from("/out/a.mp4"));
        assert!(matches!(
            runner.append_clip(&clip).await,
            Err(KlippError::StageConflict(_))
        ));

        // A runner snapshot numbered past the interrupt must not replace it.
        running.stage = Stage::Rendering;
        let mut stale = ProgressReporter::snapshot(&running, ClipCounts::default(), Some(&last));
        stale.sequence = interrupted.sequence + 5;
        runner.save_snapshot(&stale).await.unwrap();

        let stored = observer.get_snapshot(task.id).await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::Failed);
        assert_eq!(stored.error.as_deref(), Some("Interrupted"));
        let task = runner.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.stage, Stage::Failed);
        assert!(task.clip_ids.is_empty());
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_for_writer() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTaskStore::new(&dir.path().join("tasks.db")).unwrap();
        let task = Task::new(SourceRef::Url("https://example.com/v".into()), "frank");
        store.create_task(&task).await.unwrap();

        let _writing = store.writer.lock().unwrap();
        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.stage, Stage::Queued);
        assert!(store.get_snapshot(task.id).await.unwrap().is_none());
        assert!(store.list_clips(task.id).await.unwrap().is_empty());
    }

    #[test]
    fn test_on_disk_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tasks.db");
        SqliteTaskStore::new(&path).unwrap();
        assert!(path.exists());
    }
}

//! The clip service: submits tasks, tracks their runners and answers
//! progress queries.
//!
//! Each submitted task runs on its own tokio task. A semaphore caps how many
//! run at once; the rest wait in `queued` and can be cancelled there.

use crate::config::{PipelineConfig, Settings};
use crate::error::{KlippError, Result};
use crate::llm;
use crate::media::SourceDownloader;
use crate::render::{FfmpegCompositor, TransitionLibrary};
use crate::source::SourceRef;
use crate::store::{self, TaskStore};
use crate::task::{
    mark_interrupted, Clip, ClipCounts, Collaborators, ProgressReporter, ProgressSnapshot, Task,
    TaskId, TaskMachine,
};
use crate::transcription::{CachedTranscriber, Transcriber, WhisperTranscriber};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, instrument, Instrument};

type RunningTasks = Arc<Mutex<HashMap<TaskId, CancellationToken>>>;

/// Default age after which an unowned, unfinished task counts as interrupted.
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3 * 60 * 60);

/// Public entry point for clip generation.
pub struct ClipService {
    store: Arc<dyn TaskStore>,
    machine: Arc<TaskMachine>,
    permits: Arc<Semaphore>,
    running: RunningTasks,
    stale_after: Duration,
}

impl ClipService {
    pub fn new(store: Arc<dyn TaskStore>, machine: TaskMachine, task_concurrency: usize) -> Self {
        Self {
            store,
            machine: Arc::new(machine),
            permits: Arc::new(Semaphore::new(task_concurrency.max(1))),
            running: Arc::new(Mutex::new(HashMap::new())),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Wire up the production collaborators from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let config = PipelineConfig::from_settings(settings)?;
        let store = store::open(settings)?;

        let downloads = settings.temp_dir().join("downloads");
        std::fs::create_dir_all(&downloads)?;
        std::fs::create_dir_all(&config.output_dir)?;

        let transcription = &settings.transcription;
        let mut transcriber: Arc<dyn Transcriber> = Arc::new(WhisperTranscriber::with_config(
            &transcription.model,
            Some(transcription.language.clone()),
            transcription.chunk_duration_seconds,
            transcription.max_concurrent_chunks,
            Duration::from_secs(transcription.timeout_secs),
        )?);
        if transcription.cache {
            transcriber = Arc::new(CachedTranscriber::new(
                transcriber,
                settings.temp_dir().join("transcripts"),
            ));
        }

        let render = &settings.render;
        let transitions = match settings.transitions_dir() {
            Some(dir) => TransitionLibrary::load(&dir, render.transition_max_seconds)?,
            None => TransitionLibrary::empty(),
        };

        let collaborators = Collaborators {
            downloader: Arc::new(SourceDownloader::with_format(
                downloads,
                &settings.download.format,
            )),
            transcriber,
            model: llm::from_settings(&settings.llm)?,
            compositor: Arc::new(
                FfmpegCompositor::new(render.width, render.height).with_font_size(render.font_size),
            ),
        };

        let machine =
            TaskMachine::new(config, store.clone(), collaborators).with_transitions(transitions);

        Ok(Self::new(store, machine, settings.pipeline.task_concurrency)
            .with_stale_after(Duration::from_secs(settings.pipeline.stale_after_seconds)))
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    /// Create a task and start it in the background.
    #[instrument(skip(self, owner), fields(source = %source))]
    pub async fn submit_task(&self, source: SourceRef, owner: &str) -> Result<TaskId> {
        if source.is_empty() {
            return Err(KlippError::InvalidInput("source reference is empty".into()));
        }

        let task = Task::new(source, owner);
        let id = task.id;
        self.store.create_task(&task).await?;
        self.store
            .save_snapshot(&ProgressReporter::snapshot(&task, ClipCounts::default(), None))
            .await?;

        let cancel = CancellationToken::new();
        self.running()?.insert(id, cancel.clone());

        let span = info_span!("task", task_id = %id);
        tokio::spawn(
            run_task(
                self.machine.clone(),
                self.permits.clone(),
                self.running.clone(),
                id,
                cancel,
            )
            .instrument(span),
        );

        info!(task_id = %id, "Task submitted");
        Ok(id)
    }

    /// Latest progress of a task.
    ///
    /// An unfinished task with no runner in this process that has not moved
    /// for the stale period is failed as interrupted before it is reported.
    pub async fn get_progress(&self, id: TaskId) -> Result<ProgressSnapshot> {
        let task = self.require_task(id).await?;
        let snapshot = self.store.get_snapshot(id).await?;

        if self.is_stale(&task)? {
            return mark_interrupted(self.store.as_ref(), id).await;
        }

        match snapshot {
            Some(snapshot) if snapshot.stage == task.stage => Ok(snapshot),
            previous => {
                // The stage is persisted ahead of its snapshot; report the
                // stage without publishing, the runner owns the sequence.
                let clips = self.store.list_clips(id).await?;
                let counts = ClipCounts {
                    planned: previous.as_ref().map(|p| p.clips_planned).unwrap_or(0),
                    finished: clips.len(),
                    rendered: clips.iter().filter(|c| c.is_rendered()).count(),
                };
                Ok(ProgressReporter::snapshot(&task, counts, previous.as_ref()))
            }
        }
    }

    /// Rendered clips of a task, in segment order.
    pub async fn get_clips(&self, id: TaskId) -> Result<Vec<Clip>> {
        self.require_task(id).await?;
        let clips = self.store.list_clips(id).await?;
        Ok(clips.into_iter().filter(|c| c.is_rendered()).collect())
    }

    /// Request cancellation. Returns false when the task has no runner in
    /// this process.
    pub async fn cancel_task(&self, id: TaskId) -> Result<bool> {
        self.require_task(id).await?;
        match self.running()?.get(&id) {
            Some(token) => {
                info!(task_id = %id, "Cancelling task");
                token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Fail every unfinished task that has no runner in this process.
    ///
    /// Meant for start-up, after a crash left tasks mid-flight.
    pub async fn recover_interrupted(&self) -> Result<Vec<TaskId>> {
        let mut recovered = Vec::new();
        for task in self.store.list_tasks().await? {
            if task.is_terminal() || self.is_running(task.id)? {
                continue;
            }
            mark_interrupted(self.store.as_ref(), task.id).await?;
            recovered.push(task.id);
        }
        if !recovered.is_empty() {
            info!("Marked {} task(s) interrupted", recovered.len());
        }
        Ok(recovered)
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.store.list_tasks().await
    }

    async fn require_task(&self, id: TaskId) -> Result<Task> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| KlippError::TaskNotFound(id.to_string()))
    }

    fn is_stale(&self, task: &Task) -> Result<bool> {
        if task.is_terminal() || self.is_running(task.id)? {
            return Ok(false);
        }
        let age = Utc::now() - task.updated_at;
        Ok(chrono::Duration::from_std(self.stale_after).is_ok_and(|limit| age > limit))
    }

    fn is_running(&self, id: TaskId) -> Result<bool> {
        Ok(self.running()?.contains_key(&id))
    }

    fn running(&self) -> Result<std::sync::MutexGuard<'_, HashMap<TaskId, CancellationToken>>> {
        self.running
            .lock()
            .map_err(|_| KlippError::Store("running task table poisoned".into()))
    }
}

async fn run_task(
    machine: Arc<TaskMachine>,
    permits: Arc<Semaphore>,
    running: RunningTasks,
    id: TaskId,
    cancel: CancellationToken,
) {
    let permit = tokio::select! {
        _ = cancel.cancelled() => None,
        permit = permits.acquire_owned() => permit.ok(),
    };

    // A cancelled token settles the task without calling any collaborator.
    if let Err(e) = machine.run(id, cancel).await {
        error!("Task runner failed: {}", e);
    }
    drop(permit);

    if let Ok(mut running) = running.lock() {
        running.remove(&id);
    }
}

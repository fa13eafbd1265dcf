//! The stage machine that drives one task from `queued` to a terminal stage.

use super::{ClipCounts, ProgressReporter, ProgressSnapshot, Stage, Task, TaskId};
use crate::config::PipelineConfig;
use crate::error::{KlippError, Result};
use crate::llm::LanguageModel;
use crate::media::Downloader;
use crate::render::{Compositor, RenderOrchestrator, TransitionLibrary};
use crate::selection::{Segment, SegmentSelector};
use crate::source::MediaHandle;
use crate::store::TaskStore;
use crate::transcription::{Transcriber, Transcript};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// The external capabilities a task needs.
#[derive(Clone)]
pub struct Collaborators {
    pub downloader: Arc<dyn Downloader>,
    pub transcriber: Arc<dyn Transcriber>,
    pub model: Arc<dyn LanguageModel>,
    pub compositor: Arc<dyn Compositor>,
}

/// Runs tasks through download, transcription, selection and rendering.
///
/// Every transition is persisted before the next stage starts, so a reader
/// of the store never sees a stage go backwards.
pub struct TaskMachine {
    config: PipelineConfig,
    store: Arc<dyn TaskStore>,
    downloader: Arc<dyn Downloader>,
    transcriber: Arc<dyn Transcriber>,
    selector: SegmentSelector,
    renderer: RenderOrchestrator,
}

/// Mutable state of one run.
struct RunState {
    task: Task,
    counts: ClipCounts,
    last: Option<ProgressSnapshot>,
}

impl TaskMachine {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn TaskStore>,
        collaborators: Collaborators,
    ) -> Self {
        let selector = SegmentSelector::new(collaborators.model, config.timeouts.inference)
            .with_prompts(config.prompts.clone())
            .with_retry(config.retry)
            .with_filter(config.filter)
            .with_words_per_line(config.words_per_line);

        let renderer = RenderOrchestrator::new(collaborators.compositor, &config.output_dir)
            .with_cue_policy(config.cues)
            .with_timeout(config.timeouts.render);

        Self {
            config,
            store,
            downloader: collaborators.downloader,
            transcriber: collaborators.transcriber,
            selector,
            renderer,
        }
    }

    pub fn with_transitions(mut self, transitions: TransitionLibrary) -> Self {
        self.renderer = self.renderer.with_transitions(transitions);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Drive a stored task to a terminal stage and return its final state.
    ///
    /// Stage failures are recorded on the task, not returned. When another
    /// writer settles the task first (an interrupt from a second process),
    /// the run stops and returns the stored task. `Err` means the task could
    /// not be loaded or the store failed.
    #[instrument(skip(self, cancel), fields(task_id = %id))]
    pub async fn run(&self, id: TaskId, cancel: CancellationToken) -> Result<Task> {
        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or_else(|| KlippError::TaskNotFound(id.to_string()))?;

        if task.is_terminal() {
            return Ok(task);
        }

        let last = self.store.get_snapshot(id).await?;
        let mut state = RunState {
            task,
            counts: ClipCounts::default(),
            last,
        };

        match self.drive(&mut state, &cancel).await {
            Ok(()) => info!(
                "Task completed: {}/{} clips rendered",
                state.counts.rendered, state.counts.planned
            ),
            Err(e) if e.is_stage_conflict() => {
                warn!("Abandoning run: {}", e);
                state.task = self.reload(id).await?;
            }
            Err(e) => {
                if e.is_cancelled() {
                    warn!("Task cancelled during {}", state.task.stage);
                } else {
                    error!("Task failed during {}: {}", state.task.stage, e);
                }
                self.fail(&mut state, &e).await?;
            }
        }

        Ok(state.task)
    }

    async fn drive(&self, state: &mut RunState, cancel: &CancellationToken) -> Result<()> {
        let timeouts = &self.config.timeouts;

        checkpoint(cancel)?;
        if state.task.source.is_empty() {
            return Err(KlippError::InvalidInput("source reference is empty".into()));
        }
        self.advance(state, Stage::Downloading).await?;
        let media = guarded(
            cancel,
            timeouts.download,
            KlippError::DownloadFailed,
            self.downloader.fetch(&state.task.source),
        )
        .await?;

        checkpoint(cancel)?;
        if media.is_empty() {
            return Err(KlippError::DownloadFailed("downloader returned no media".into()));
        }
        self.check_source_length(&media)?;
        self.advance(state, Stage::Transcribing).await?;
        let words = guarded(
            cancel,
            timeouts.transcription,
            KlippError::TranscriptionFailed,
            self.transcriber.transcribe(&media),
        )
        .await?;
        let transcript = Transcript::from_words(words)?;
        info!(
            "Transcript has {} words over {:.0}s",
            transcript.len(),
            transcript.duration()
        );

        checkpoint(cancel)?;
        self.advance(state, Stage::Selecting).await?;
        let segments = self
            .selector
            .select(
                &transcript,
                media.duration_seconds,
                self.config.max_clips,
                self.config.bounds,
                cancel,
            )
            .await?;

        checkpoint(cancel)?;
        if segments.is_empty() {
            return Err(KlippError::SelectionFailed("no segments selected".into()));
        }
        state.counts.planned = segments.len();
        self.advance(state, Stage::Rendering).await?;
        self.render_all(state, &media, &segments, &transcript, cancel)
            .await?;

        if state.counts.rendered == 0 {
            return Err(KlippError::RenderFailed(format!(
                "all {} segment(s) failed to render",
                state.counts.planned
            )));
        }
        self.advance(state, Stage::Completed).await
    }

    /// Reject sources outside the configured length. Media whose length
    /// is unknown is let through.
    fn check_source_length(&self, media: &MediaHandle) -> Result<()> {
        let limits = self.config.source_limits;
        match media.duration_seconds {
            Some(duration) if !limits.contains(duration) => Err(KlippError::DownloadFailed(format!(
                "source is {:.0} seconds long, outside the accepted {:.0}-{:.0} seconds",
                duration, limits.min, limits.max
            ))),
            Some(_) => Ok(()),
            None => {
                warn!("Source length unknown, skipping length check");
                Ok(())
            }
        }
    }

    /// Render segments with bounded concurrency, recording each clip as it
    /// finishes. Segments not yet started when `cancel` fires are skipped.
    async fn render_all(
        &self,
        state: &mut RunState,
        media: &MediaHandle,
        segments: &[Segment],
        transcript: &Transcript,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let task_id = state.task.id;
        let renderer = &self.renderer;

        // Collected eagerly: a lazy `map` over borrowed segments is not
        // `Send` for every lifetime, and spawned runs need it to be.
        let renders: Vec<_> = segments
            .iter()
            .enumerate()
            .map(|(index, segment)| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                Some(
                    renderer
                        .render_clip(task_id, index, media, segment, transcript)
                        .await,
                )
            })
            .collect();

        // `buffered` yields in segment order whatever order renders finish in.
        let mut clips = stream::iter(renders).buffered(self.config.render_concurrency.max(1));

        while let Some(clip) = clips.next().await {
            let Some(clip) = clip else { continue };

            self.store.append_clip(&clip).await?;
            state.counts.finished += 1;
            if clip.is_rendered() {
                state.counts.rendered += 1;
            }
            state.task.clip_ids.push(clip.id.clone());
            self.publish(state).await?;
        }

        checkpoint(cancel)
    }

    /// Persist a forward transition and publish the matching snapshot.
    async fn advance(&self, state: &mut RunState, next: Stage) -> Result<()> {
        if !state.task.stage.can_advance_to(next) {
            return Err(KlippError::InvalidInput(format!(
                "illegal transition {} -> {}",
                state.task.stage, next
            )));
        }
        state.task = self.store.update_stage(state.task.id, next, None).await?;
        info!("Stage: {}", next);
        self.publish(state).await
    }

    async fn fail(&self, state: &mut RunState, err: &KlippError) -> Result<()> {
        if state.task.is_terminal() {
            return Ok(());
        }
        let message = err.to_string();
        match self
            .store
            .update_stage(state.task.id, Stage::Failed, Some(&message))
            .await
        {
            Ok(task) => state.task = task,
            Err(e) if e.is_stage_conflict() => {
                warn!("Task already settled: {}", e);
                state.task = self.reload(state.task.id).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.publish(state).await
    }

    async fn reload(&self, id: TaskId) -> Result<Task> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| KlippError::TaskNotFound(id.to_string()))
    }

    async fn publish(&self, state: &mut RunState) -> Result<()> {
        let snapshot = ProgressReporter::snapshot(&state.task, state.counts, state.last.as_ref());
        self.store.save_snapshot(&snapshot).await?;
        state.last = Some(snapshot);
        Ok(())
    }
}

/// Fail a task that lost its runner, e.g. after a process restart.
///
/// Terminal tasks are left alone and their latest snapshot is returned.
pub async fn mark_interrupted(store: &dyn TaskStore, id: TaskId) -> Result<ProgressSnapshot> {
    let task = store
        .get_task(id)
        .await?
        .ok_or_else(|| KlippError::TaskNotFound(id.to_string()))?;
    let previous = store.get_snapshot(id).await?;
    let clips = store.list_clips(id).await?;

    let rendered = clips.iter().filter(|c| c.is_rendered()).count();
    let counts = ClipCounts {
        planned: previous
            .as_ref()
            .map(|p| p.clips_planned)
            .unwrap_or(0)
            .max(clips.len()),
        finished: clips.len(),
        rendered,
    };

    let task = if task.is_terminal() {
        task
    } else {
        warn!(task_id = %id, "Marking task interrupted during {}", task.stage);
        let message = KlippError::Interrupted.to_string();
        match store.update_stage(id, Stage::Failed, Some(&message)).await {
            Ok(task) => task,
            // The runner finished in the meantime.
            Err(e) if e.is_stage_conflict() => store
                .get_task(id)
                .await?
                .ok_or_else(|| KlippError::TaskNotFound(id.to_string()))?,
            Err(e) => return Err(e),
        }
    };

    if let Some(snapshot) = previous.as_ref().filter(|p| p.is_terminal() && p.stage == task.stage) {
        return Ok(snapshot.clone());
    }
    store
        .save_snapshot(&ProgressReporter::snapshot(&task, counts, previous.as_ref()))
        .await?;
    // A concurrent terminal snapshot may have won; report what is stored.
    store
        .get_snapshot(id)
        .await?
        .ok_or_else(|| KlippError::TaskNotFound(id.to_string()))
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(KlippError::Cancelled)
    } else {
        Ok(())
    }
}

/// Run a stage call under its time limit, racing cancellation.
async fn guarded<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    on_timeout: fn(String) -> KlippError,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(KlippError::Cancelled),
        result = tokio::time::timeout(limit, call) => match result {
            Ok(result) => result,
            Err(_) => Err(on_timeout(format!("timed out after {} seconds", limit.as_secs()))),
        },
    }
}

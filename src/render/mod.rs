//! Turning selected segments into clips.
//!
//! For every segment the [`RenderOrchestrator`] derives subtitle cues from
//! the transcript, picks a transition and hands a [`RenderRequest`] to the
//! [`Compositor`]. A failed render becomes a failed [`Clip`]; it never
//! affects the other segments of the task.

mod cues;
mod ffmpeg;
mod transitions;

pub use cues::{build_cues, to_srt, CuePolicy, SubtitleCue};
pub use ffmpeg::FfmpegCompositor;
pub use transitions::{Transition, TransitionLibrary};

use crate::error::{KlippError, Result};
use crate::selection::Segment;
use crate::source::MediaHandle;
use crate::task::{Clip, TaskId};
use crate::transcription::Transcript;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Everything the compositor needs to produce one clip file.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub media: MediaHandle,
    pub start: f64,
    pub end: f64,
    /// Cues relative to `start`.
    pub cues: Vec<SubtitleCue>,
    pub transition: Option<Transition>,
    pub output: PathBuf,
}

/// Trait for video compositors.
#[async_trait]
pub trait Compositor: Send + Sync {
    /// Render the request and return the path of the written file.
    async fn render(&self, request: &RenderRequest) -> Result<PathBuf>;
}

/// Renders the segments of a task, one clip at a time.
pub struct RenderOrchestrator {
    compositor: Arc<dyn Compositor>,
    transitions: TransitionLibrary,
    cues: CuePolicy,
    output_dir: PathBuf,
    timeout: Duration,
}

impl RenderOrchestrator {
    pub fn new(compositor: Arc<dyn Compositor>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            compositor,
            transitions: TransitionLibrary::empty(),
            cues: CuePolicy::default(),
            output_dir: output_dir.into(),
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_transitions(mut self, transitions: TransitionLibrary) -> Self {
        self.transitions = transitions;
        self
    }

    pub fn with_cue_policy(mut self, cues: CuePolicy) -> Self {
        self.cues = cues;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Where the clip for segment `index` of `task_id` is written.
    pub fn clip_path(&self, task_id: TaskId, index: usize) -> PathBuf {
        clip_path(&self.output_dir, task_id, index)
    }

    /// Build the compositor request for one segment.
    pub fn request_for(
        &self,
        task_id: TaskId,
        index: usize,
        media: &MediaHandle,
        segment: &Segment,
        transcript: &Transcript,
    ) -> RenderRequest {
        let words = transcript.words_between(segment.start, segment.end);
        RenderRequest {
            media: media.clone(),
            start: segment.start,
            end: segment.end,
            cues: build_cues(words, segment.start, segment.end, &self.cues),
            transition: self.transitions.pick(index),
            output: self.clip_path(task_id, index),
        }
    }

    /// Render one segment. Failures are captured in the returned clip.
    #[instrument(skip_all, fields(task_id = %task_id, index = index))]
    pub async fn render_clip(
        &self,
        task_id: TaskId,
        index: usize,
        media: &MediaHandle,
        segment: &Segment,
        transcript: &Transcript,
    ) -> Clip {
        let request = self.request_for(task_id, index, media, segment, transcript);

        let result = match tokio::time::timeout(self.timeout, self.compositor.render(&request)).await {
            Ok(result) => result,
            Err(_) => Err(KlippError::RenderFailed(format!(
                "timed out after {} seconds",
                self.timeout.as_secs()
            ))),
        };

        match result {
            Ok(path) => {
                info!("Rendered clip {} ({:.1}s)", index + 1, segment.duration());
                Clip::rendered(task_id, index, segment.clone(), path)
            }
            Err(e) => {
                warn!("Clip {} failed: {}", index + 1, e);
                Clip::failed(task_id, index, segment.clone(), e.to_string())
            }
        }
    }
}

fn clip_path(output_dir: &Path, task_id: TaskId, index: usize) -> PathBuf {
    output_dir
        .join(task_id.to_string())
        .join(format!("clip_{:02}.mp4", index + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ClipStatus;
    use crate::testing::{transcript_of, FakeCompositor};

    #[tokio::test]
    async fn test_render_clip_success_and_failure() {
        let compositor = Arc::new(FakeCompositor::failing_on(&[1]));
        let orchestrator = RenderOrchestrator::new(compositor.clone(), "/out").with_transitions(
            TransitionLibrary::from_assets(vec![PathBuf::from("t.mp4")], 1.5),
        );
        let transcript = transcript_of(120, 60.0);
        let media = MediaHandle::new("/in.mp4");
        let task_id = TaskId::new();

        let ok = orchestrator
            .render_clip(task_id, 0, &media, &Segment::new(0.0, 30.0, "a"), &transcript)
            .await;
        assert_eq!(ok.status, ClipStatus::Rendered);
        assert_eq!(
            ok.path,
            Some(PathBuf::from(format!("/out/{}/clip_01.mp4", task_id)))
        );

        let bad = orchestrator
            .render_clip(task_id, 1, &media, &Segment::new(30.0, 60.0, "b"), &transcript)
            .await;
        assert_eq!(bad.status, ClipStatus::Failed);
        assert!(bad.path.is_none());
        assert!(bad.error.unwrap().contains("Render failed"));

        let requests = compositor.requests();
        assert!(requests[0].transition.is_none());
        assert!(requests[1].transition.is_some());
        assert!(!requests[0].cues.is_empty());
        assert!(requests[0].cues.iter().all(|c| c.end <= 30.0));
    }
}

//! Hand-written fakes for the pipeline's collaborators.

use crate::error::{KlippError, Result};
use crate::llm::{LanguageModel, Prompt};
use crate::media::Downloader;
use crate::render::{Compositor, RenderRequest};
use crate::source::{MediaHandle, SourceRef};
use crate::store::{MemoryTaskStore, TaskStore};
use crate::task::{Clip, ProgressSnapshot, Stage, Task, TaskId};
use crate::transcription::{RawWord, Transcriber, Transcript};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// `count` evenly spaced words covering `[0, duration)`, with a sentence
/// break every tenth word.
pub fn raw_words(count: usize, duration: f64) -> Vec<RawWord> {
    let step = duration / count as f64;
    (0..count)
        .map(|i| {
            let text = if i % 10 == 9 {
                format!("word{i}.")
            } else {
                format!("word{i}")
            };
            RawWord::new(text, i as f64 * step, (i + 1) as f64 * step)
        })
        .collect()
}

pub fn transcript_of(count: usize, duration: f64) -> Transcript {
    Transcript::from_words(raw_words(count, duration)).unwrap()
}

/// A JSON reply selecting the given ranges.
pub fn segments_reply(ranges: &[(f64, f64)]) -> String {
    let items: Vec<String> = ranges
        .iter()
        .enumerate()
        .map(|(i, (s, e))| format!(r#"{{"start": {s}, "end": {e}, "label": "segment {i}"}}"#))
        .collect();
    format!(r#"{{"segments": [{}]}}"#, items.join(", "))
}

pub struct FakeDownloader {
    result: std::result::Result<MediaHandle, String>,
    pub calls: AtomicUsize,
}

impl FakeDownloader {
    pub fn ok() -> Self {
        Self {
            result: Ok(MediaHandle {
                path: PathBuf::from("/media/source.mp4"),
                duration_seconds: Some(300.0),
            }),
            calls: AtomicUsize::new(0),
        }
    }

    /// Succeeds with media of the given measured length.
    pub fn with_duration(duration_seconds: Option<f64>) -> Self {
        Self {
            result: Ok(MediaHandle {
                path: PathBuf::from("/media/source.mp4"),
                duration_seconds,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn fetch(&self, _source: &SourceRef) -> Result<MediaHandle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(KlippError::DownloadFailed)
    }
}

pub struct FakeTranscriber {
    words: Vec<RawWord>,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(words: Vec<RawWord>) -> Self {
        Self {
            words,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _media: &MediaHandle) -> Result<Vec<RawWord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.words.clone())
    }
}

enum Script {
    Replies(Mutex<VecDeque<String>>),
    Repeat(String),
    Fail,
    Hang,
}

/// A language model that answers from a script.
pub struct ScriptedModel {
    script: Script,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedModel {
    /// Replies in order; the last one repeats once the script runs out.
    pub fn new(replies: Vec<String>) -> Self {
        Self::with_script(Script::Replies(Mutex::new(replies.into())))
    }

    pub fn repeating(reply: &str) -> Self {
        Self::with_script(Script::Repeat(reply.to_string()))
    }

    pub fn failing() -> Self {
        Self::with_script(Script::Fail)
    }

    pub fn hanging() -> Self {
        Self::with_script(Script::Hang)
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &Prompt, _timeout: Duration) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        match &self.script {
            Script::Replies(queue) => {
                let mut queue = queue.lock().unwrap();
                let reply = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                Ok(reply.unwrap_or_default())
            }
            Script::Repeat(reply) => Ok(reply.clone()),
            Script::Fail => Err(KlippError::InferenceFailed("connection refused".into())),
            Script::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A compositor that records requests and fails chosen segments.
pub struct FakeCompositor {
    failing: HashSet<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
    /// Segment count and delay step for `finishing_in_reverse`.
    reverse_below: Option<(usize, Duration)>,
    requests: Mutex<Vec<RenderRequest>>,
    finished: Mutex<Vec<usize>>,
}

impl FakeCompositor {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            cancel_after: None,
            reverse_below: None,
            requests: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        }
    }

    /// Segment `i` of `count` takes `(count - i) * step`.
    pub fn finishing_in_reverse(count: usize, step: Duration) -> Self {
        Self {
            reverse_below: Some((count, step)),
            ..Self::new()
        }
    }

    /// Fail the segments at these indices.
    pub fn failing_on(indices: &[usize]) -> Self {
        Self {
            failing: indices.iter().copied().collect(),
            ..Self::new()
        }
    }

    /// Cancel `token` while serving call number `calls`.
    pub fn cancelling_after(calls: usize, token: CancellationToken) -> Self {
        Self {
            cancel_after: Some((calls, token)),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Segment indices in the order their renders returned.
    pub fn finished(&self) -> Vec<usize> {
        self.finished.lock().unwrap().clone()
    }
}

/// Segment index encoded in a `clip_NN.mp4` output name.
fn index_of(request: &RenderRequest) -> Option<usize> {
    let stem = request.output.file_stem()?.to_str()?;
    let number: usize = stem.strip_prefix("clip_")?.parse().ok()?;
    number.checked_sub(1)
}

#[async_trait]
impl Compositor for FakeCompositor {
    async fn render(&self, request: &RenderRequest) -> Result<PathBuf> {
        let calls = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };

        if let Some((after, token)) = &self.cancel_after {
            if calls == *after {
                token.cancel();
            }
        }

        let index = index_of(request);
        if let (Some((count, step)), Some(index)) = (self.reverse_below, index) {
            let slower = count.saturating_sub(index) as u32;
            tokio::time::sleep(step * slower).await;
        }
        if let Some(index) = index {
            self.finished.lock().unwrap().push(index);
        }

        match index {
            Some(index) if self.failing.contains(&index) => {
                Err(KlippError::RenderFailed(format!("segment {index} is cursed")))
            }
            _ => Ok(request.output.clone()),
        }
    }
}

/// A memory store that remembers every snapshot it was asked to save.
pub struct RecordingStore {
    inner: MemoryTaskStore,
    saved: Mutex<Vec<ProgressSnapshot>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryTaskStore::new(),
            saved: Mutex::new(Vec::new()),
        }
    }

    pub fn saved(&self) -> Vec<ProgressSnapshot> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskStore for RecordingStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        self.inner.create_task(task).await
    }

    async fn update_stage(&self, id: TaskId, stage: Stage, error: Option<&str>) -> Result<Task> {
        self.inner.update_stage(id, stage, error).await
    }

    async fn append_clip(&self, clip: &Clip) -> Result<()> {
        self.inner.append_clip(clip).await
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.inner.get_task(id).await
    }

    async fn list_clips(&self, id: TaskId) -> Result<Vec<Clip>> {
        self.inner.list_clips(id).await
    }

    async fn save_snapshot(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        self.saved.lock().unwrap().push(snapshot.clone());
        self.inner.save_snapshot(snapshot).await
    }

    async fn get_snapshot(&self, id: TaskId) -> Result<Option<ProgressSnapshot>> {
        self.inner.get_snapshot(id).await
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.inner.list_tasks().await
    }
}

//! The immutable configuration a task machine runs with.

use super::{Prompts, Settings};
use crate::error::Result;
use crate::render::CuePolicy;
use crate::selection::{DurationBounds, FilterOptions, RetryPolicy};
use std::path::PathBuf;
use std::time::Duration;

/// Per-collaborator time limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageTimeouts {
    pub download: Duration,
    pub transcription: Duration,
    pub inference: Duration,
    pub render: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            download: Duration::from_secs(1800),
            transcription: Duration::from_secs(3600),
            inference: Duration::from_secs(7200),
            render: Duration::from_secs(600),
        }
    }
}

/// Everything a task needs to know about how to run, resolved once from
/// [`Settings`] and never changed afterwards.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub bounds: DurationBounds,
    /// Accepted length of the source video itself.
    pub source_limits: DurationBounds,
    pub max_clips: usize,
    pub retry: RetryPolicy,
    pub filter: FilterOptions,
    pub words_per_line: usize,
    pub cues: CuePolicy,
    pub render_concurrency: usize,
    pub timeouts: StageTimeouts,
    /// Clips go to `<output_dir>/<task_id>/`.
    pub output_dir: PathBuf,
    pub prompts: Prompts,
}

impl PipelineConfig {
    /// Validate `settings` and resolve them, including custom prompts.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;
        Ok(Self::resolve(settings, prompts))
    }

    fn resolve(settings: &Settings, prompts: Prompts) -> Self {
        let sel = &settings.selection;
        let render = &settings.render;

        Self {
            bounds: DurationBounds::new(sel.min_segment_seconds, sel.max_segment_seconds),
            source_limits: DurationBounds::new(
                settings.download.min_source_seconds,
                settings.download.max_source_seconds,
            ),
            max_clips: sel.max_clips_per_task,
            retry: RetryPolicy::new(
                sel.max_attempts,
                Duration::from_millis(sel.retry_backoff_ms),
                Duration::from_millis(sel.retry_max_backoff_ms),
            ),
            filter: FilterOptions {
                dedupe_tolerance: sel.dedupe_tolerance_seconds,
                overlap_policy: sel.overlap_policy,
            },
            words_per_line: sel.words_per_line,
            cues: CuePolicy {
                max_chars: render.cue_max_chars,
                max_words: render.cue_max_words,
                max_duration: render.cue_max_seconds,
                max_gap: render.cue_gap_seconds,
            },
            render_concurrency: render.concurrency.max(1),
            timeouts: StageTimeouts {
                download: Duration::from_secs(settings.download.timeout_secs),
                transcription: Duration::from_secs(settings.transcription.timeout_secs),
                inference: Duration::from_secs(settings.llm.timeout_secs),
                render: Duration::from_secs(render.timeout_secs),
            },
            output_dir: settings.output_dir(),
            prompts,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::resolve(&Settings::default(), Prompts::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverlapPolicy;

    #[test]
    fn test_from_settings() {
        let mut settings = Settings::default();
        settings.selection.max_attempts = 4;
        settings.selection.overlap_policy = OverlapPolicy::Allow;
        settings.render.cue_max_words = 5;
        settings.llm.timeout_secs = 90;

        let config = PipelineConfig::from_settings(&settings).unwrap();
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.filter.overlap_policy, OverlapPolicy::Allow);
        assert_eq!(config.cues.max_words, 5);
        assert_eq!(config.timeouts.inference, Duration::from_secs(90));
        assert_eq!(config.bounds, DurationBounds::new(30.0, 60.0));
        assert_eq!(config.source_limits, DurationBounds::new(60.0, 7200.0));
    }

    #[test]
    fn test_from_settings_validates() {
        let mut settings = Settings::default();
        settings.selection.max_attempts = 0;
        assert!(PipelineConfig::from_settings(&settings).is_err());
    }
}

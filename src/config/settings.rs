//! Configuration settings for Klipp.

use crate::error::{KlippError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub download: DownloadSettings,
    pub transcription: TranscriptionSettings,
    pub llm: LlmSettings,
    pub selection: SelectionSettings,
    pub render: RenderSettings,
    pub pipeline: PipelineSettings,
    pub store: StoreSettings,
    pub server: ServerSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Directory for downloaded source videos.
    pub temp_dir: String,
    /// Directory rendered clips are written under, one folder per task.
    pub output_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.klipp".to_string(),
            temp_dir: "/tmp/klipp".to_string(),
            output_dir: "~/.klipp/clips".to_string(),
            log_level: "warn".to_string(),
        }
    }
}

/// Source download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// yt-dlp format selector.
    pub format: String,
    /// Timeout for a single download, in seconds.
    pub timeout_secs: u64,
    /// Sources shorter than this are rejected.
    pub min_source_seconds: f64,
    /// Sources longer than this are rejected.
    pub max_source_seconds: f64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            format: crate::media::DEFAULT_FORMAT.to_string(),
            timeout_secs: 1800,
            min_source_seconds: 60.0,
            max_source_seconds: 7200.0,
        }
    }
}

/// Transcription service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Whisper model to use.
    pub model: String,
    /// Language hint passed to the engine; empty for auto-detect.
    pub language: String,
    /// Duration in seconds for splitting long audio files.
    pub chunk_duration_seconds: u32,
    /// Maximum concurrent chunk processing.
    pub max_concurrent_chunks: usize,
    /// Timeout for the whole transcription stage, in seconds.
    pub timeout_secs: u64,
    /// Reuse transcripts of media that was already transcribed.
    pub cache: bool,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            language: String::new(),
            chunk_duration_seconds: 600,
            max_concurrent_chunks: 3,
            timeout_secs: 3600,
            cache: true,
        }
    }
}

/// Language model provider type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Local Ollama server (default).
    #[default]
    Ollama,
    /// OpenAI chat completions.
    OpenAi,
}

impl std::str::FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "openai" => Ok(LlmProvider::OpenAi),
            _ => Err(format!("Unknown LLM provider: {}", s)),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Ollama => write!(f, "ollama"),
            LlmProvider::OpenAi => write!(f, "openai"),
        }
    }
}

/// Language model settings used for segment selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    /// Base URL of the inference server. Empty means the provider default.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Inference timeout in seconds. Local models on long transcripts are slow.
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b-instruct-q6_K".to_string(),
            temperature: 0.1,
            timeout_secs: 7200,
        }
    }
}

/// How overlapping segments are handled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Keep overlapping segments as they are.
    Allow,
    /// Drop a segment that overlaps one already accepted.
    #[default]
    Reject,
    /// Merge overlapping segments when the result still fits the bounds.
    Merge,
}

impl std::str::FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(OverlapPolicy::Allow),
            "reject" => Ok(OverlapPolicy::Reject),
            "merge" => Ok(OverlapPolicy::Merge),
            _ => Err(format!("Unknown overlap policy: {}", s)),
        }
    }
}

/// Segment selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSettings {
    pub min_segment_seconds: f64,
    pub max_segment_seconds: f64,
    pub max_clips_per_task: usize,
    /// Total attempts at getting a usable answer from the model.
    pub max_attempts: u32,
    /// Base delay between attempts; doubles after each failure.
    pub retry_backoff_ms: u64,
    /// Upper bound on the delay between attempts.
    pub retry_max_backoff_ms: u64,
    /// Segments whose start and end both fall within this distance are duplicates.
    pub dedupe_tolerance_seconds: f64,
    pub overlap_policy: OverlapPolicy,
    /// Words per line in the transcript shown to the model.
    pub words_per_line: usize,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            min_segment_seconds: 30.0,
            max_segment_seconds: 60.0,
            max_clips_per_task: 5,
            max_attempts: 3,
            retry_backoff_ms: 2000,
            retry_max_backoff_ms: 30_000,
            dedupe_tolerance_seconds: 2.0,
            overlap_policy: OverlapPolicy::Reject,
            words_per_line: 8,
        }
    }
}

/// Clip rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Segments rendered at the same time within one task.
    pub concurrency: usize,
    /// Timeout for a single clip render, in seconds.
    pub timeout_secs: u64,
    pub width: u32,
    pub height: u32,
    /// Directory of `.mp4` transition assets. Empty disables transitions.
    pub transitions_dir: String,
    pub transition_max_seconds: f64,
    pub cue_max_chars: usize,
    pub cue_max_words: usize,
    pub cue_max_seconds: f64,
    /// A silence at least this long always starts a new cue.
    pub cue_gap_seconds: f64,
    pub font_size: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            timeout_secs: 600,
            width: 1080,
            height: 1920,
            transitions_dir: String::new(),
            transition_max_seconds: 1.5,
            cue_max_chars: 32,
            cue_max_words: 3,
            cue_max_seconds: 2.5,
            cue_gap_seconds: 0.6,
            font_size: 18,
        }
    }
}

/// Task scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Tasks processed at the same time; the rest wait in `Queued`.
    pub task_concurrency: usize,
    /// A non-terminal task not updated for this long, and not running in this
    /// process, is considered interrupted.
    pub stale_after_seconds: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            task_concurrency: 2,
            stale_after_seconds: 3 * 3600,
        }
    }
}

/// Task store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Store provider (sqlite, memory).
    pub provider: String,
    /// Path to SQLite database (for sqlite provider).
    pub sqlite_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            provider: "sqlite".to_string(),
            sqlite_path: "~/.klipp/tasks.db".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| KlippError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("klipp")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Get the expanded clip output directory.
    pub fn output_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.output_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.store.sqlite_path)
    }

    /// Get the expanded transitions directory, if one is configured.
    pub fn transitions_dir(&self) -> Option<PathBuf> {
        let dir = self.render.transitions_dir.trim();
        (!dir.is_empty()).then(|| Self::expand_path(dir))
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let sel = &self.selection;
        if !valid_range(sel.min_segment_seconds, sel.max_segment_seconds)
            || sel.min_segment_seconds <= 0.0
        {
            return Err(KlippError::Config(format!(
                "invalid segment bounds: min {} max {}",
                sel.min_segment_seconds, sel.max_segment_seconds
            )));
        }
        if !(sel.dedupe_tolerance_seconds.is_finite() && sel.dedupe_tolerance_seconds >= 0.0) {
            return Err(KlippError::Config(format!(
                "invalid dedupe_tolerance_seconds: {}",
                sel.dedupe_tolerance_seconds
            )));
        }
        let download = &self.download;
        if !valid_range(download.min_source_seconds, download.max_source_seconds) {
            return Err(KlippError::Config(format!(
                "invalid source duration limits: min {} max {}",
                download.min_source_seconds, download.max_source_seconds
            )));
        }
        if sel.max_clips_per_task == 0 {
            return Err(KlippError::Config("max_clips_per_task must be at least 1".into()));
        }
        if sel.max_attempts == 0 {
            return Err(KlippError::Config("max_attempts must be at least 1".into()));
        }
        if self.render.concurrency == 0 || self.pipeline.task_concurrency == 0 {
            return Err(KlippError::Config("concurrency limits must be at least 1".into()));
        }
        Ok(())
    }
}

/// Finite, non-negative and ordered. NaN fails every comparison, so it is
/// checked explicitly.
fn valid_range(min: f64, max: f64) -> bool {
    min.is_finite() && max.is_finite() && min >= 0.0 && max >= min
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.selection.min_segment_seconds, 30.0);
        assert_eq!(settings.selection.max_segment_seconds, 60.0);
        assert_eq!(settings.llm.timeout_secs, 7200);
        assert_eq!(settings.render.transition_max_seconds, 1.5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [selection]
            max_clips_per_task = 3
            overlap_policy = "merge"

            [llm]
            provider = "openai"
            "#,
        )
        .unwrap();

        assert_eq!(settings.selection.max_clips_per_task, 3);
        assert_eq!(settings.selection.overlap_policy, OverlapPolicy::Merge);
        assert_eq!(settings.selection.min_segment_seconds, 30.0);
        assert_eq!(settings.llm.provider, LlmProvider::OpenAi);
        assert_eq!(settings.render.concurrency, 2);
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut settings = Settings::default();
        settings.selection.min_segment_seconds = 90.0;
        assert!(matches!(settings.validate(), Err(KlippError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_nan_and_negative_values() {
        let mut settings = Settings::default();
        settings.selection.min_segment_seconds = f64::NAN;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.selection.max_segment_seconds = f64::NAN;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.selection.min_segment_seconds = -5.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.selection.dedupe_tolerance_seconds = -1.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.selection.dedupe_tolerance_seconds = f64::INFINITY;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.download.max_source_seconds = 30.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut settings = Settings::default();
        settings.pipeline.task_concurrency = 7;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.pipeline.task_concurrency, 7);
    }
}

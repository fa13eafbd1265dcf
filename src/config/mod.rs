//! Configuration module for Klipp.
//!
//! Handles loading and managing application settings and prompt templates,
//! and resolving them into the [`PipelineConfig`] tasks run with.

mod pipeline;
mod prompts;
mod settings;

pub use pipeline::{PipelineConfig, StageTimeouts};
pub use prompts::{Prompts, SelectionPrompts};
pub use settings::{
    DownloadSettings, GeneralSettings, LlmProvider, LlmSettings, OverlapPolicy,
    PipelineSettings, PromptSettings, RenderSettings, SelectionSettings, ServerSettings,
    Settings, StoreSettings, TranscriptionSettings,
};

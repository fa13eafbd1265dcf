//! Klipp - short clips from long videos
//!
//! Klipp downloads a video, transcribes it with word-level timestamps, asks a
//! language model which stretches are worth watching on their own and
//! renders each of them as a vertical clip with burned-in subtitles.
//!
//! # Architecture
//!
//! - `source` / `media` - source references, download and ffmpeg helpers
//! - `transcription` - speech-to-text and the validated [`transcription::Transcript`]
//! - `llm` - language model backends (Ollama, OpenAI-compatible)
//! - `selection` - prompting, response parsing, retry and segment filtering
//! - `render` - subtitle cues, transitions and the ffmpeg compositor
//! - `task` - task records, the stage machine and progress snapshots
//! - `store` - task persistence (SQLite or in-memory)
//! - `orchestrator` - the [`orchestrator::ClipService`] entry point
//!
//! # Example
//!
//! ```rust,no_run
//! use klipp::config::Settings;
//! use klipp::orchestrator::ClipService;
//! use klipp::source::SourceRef;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let service = ClipService::from_settings(&settings)?;
//!
//!     let id = service
//!         .submit_task(SourceRef::parse("dQw4w9WgXcQ")?, "me")
//!         .await?;
//!     let progress = service.get_progress(id).await?;
//!     println!("{}: {}%", progress.stage, progress.percent);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod media;
pub mod openai;
pub mod orchestrator;
pub mod render;
pub mod selection;
pub mod source;
pub mod store;
pub mod task;
pub mod transcription;

#[cfg(test)]
mod testing;

pub use error::{KlippError, Result};

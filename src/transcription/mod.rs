//! Speech-to-text for Klipp.
//!
//! The pipeline only needs word-level timings: a [`Transcriber`] returns raw
//! words, and [`Transcript::from_words`] normalizes and validates them before
//! anything downstream sees them.

mod cache;
mod models;
mod whisper;

pub use cache::CachedTranscriber;
pub use models::{format_timestamp, RawWord, Transcript, TranscriptWord};
pub use whisper::{is_api_key_configured, WhisperTranscriber};

use crate::error::Result;
use crate::source::MediaHandle;
use async_trait::async_trait;

/// Trait for speech-to-text engines.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the media's audio track into timed words.
    async fn transcribe(&self, media: &MediaHandle) -> Result<Vec<RawWord>>;
}

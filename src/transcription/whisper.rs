//! OpenAI Whisper transcription implementation.

use super::{RawWord, Transcriber};
use crate::error::{KlippError, Result};
use crate::media::ffmpeg;
use crate::openai::create_client_with_timeout;
use crate::source::MediaHandle;
use async_openai::types::{
    AudioInput, AudioResponseFormat, CreateTranscriptionRequestArgs, TimestampGranularity,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// OpenAI Whisper-based transcriber producing word-level timestamps.
pub struct WhisperTranscriber {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    language: Option<String>,
    chunk_duration_seconds: u32,
    max_concurrent_chunks: usize,
}

impl WhisperTranscriber {
    /// Create a new Whisper transcriber with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config("whisper-1", None, 600, 3, Duration::from_secs(300))
    }

    /// Create a new Whisper transcriber with custom configuration.
    pub fn with_config(
        model: &str,
        language: Option<String>,
        chunk_duration_seconds: u32,
        max_concurrent_chunks: usize,
        request_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: create_client_with_timeout(request_timeout)?,
            model: model.to_string(),
            language: language.filter(|l| !l.is_empty()),
            chunk_duration_seconds,
            max_concurrent_chunks: max_concurrent_chunks.max(1),
        })
    }

    /// Transcribe a single audio file with word-level timestamps.
    #[instrument(skip(self), fields(audio_path = %audio_path.display()))]
    async fn transcribe_chunk(&self, audio_path: &Path) -> Result<Vec<RawWord>> {
        debug!("Transcribing audio chunk");

        let file_bytes = tokio::fs::read(audio_path).await?;

        let mut request_builder = CreateTranscriptionRequestArgs::default();
        request_builder
            .file(AudioInput::from_vec_u8(
                audio_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("audio.mp3")
                    .to_string(),
                file_bytes,
            ))
            .model(&self.model)
            .response_format(AudioResponseFormat::VerboseJson)
            .timestamp_granularities(vec![TimestampGranularity::Word]);

        if let Some(lang) = &self.language {
            request_builder.language(lang);
        }

        let request = request_builder.build().map_err(|e| {
            KlippError::TranscriptionFailed(format!("Failed to build request: {}", e))
        })?;

        let response = self
            .client
            .audio()
            .transcribe_verbose_json(request)
            .await
            .map_err(|e| KlippError::TranscriptionFailed(format!("Whisper API error: {}", e)))?;

        let words: Vec<RawWord> = match response.words {
            Some(ws) => ws
                .iter()
                .map(|w| RawWord::new(w.word.clone(), w.start as f64, w.end as f64))
                .collect(),
            None => {
                warn!("No word-level timestamps returned, spreading segment text evenly");
                response
                    .segments
                    .unwrap_or_default()
                    .iter()
                    .flat_map(|s| spread_words(&s.text, s.start as f64, s.end as f64))
                    .collect()
            }
        };

        debug!("Transcribed {} words", words.len());
        Ok(words)
    }
}

/// Approximate word timings by dividing a segment evenly.
fn spread_words(text: &str, start: f64, end: f64) -> Vec<RawWord> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let step = (end - start).max(0.0) / words.len() as f64;
    words
        .into_iter()
        .enumerate()
        .map(|(i, w)| {
            RawWord::new(
                w,
                start + i as f64 * step,
                start + (i + 1) as f64 * step,
            )
        })
        .collect()
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    #[instrument(skip_all, fields(media = %media.path.display()))]
    async fn transcribe(&self, media: &MediaHandle) -> Result<Vec<RawWord>> {
        let temp_dir = tempfile::tempdir()?;
        let audio_path = temp_dir.path().join("audio.mp3");
        ffmpeg::extract_audio(&media.path, &audio_path).await?;

        let chunks = ffmpeg::split_audio(
            &audio_path,
            &temp_dir.path().join("chunks"),
            self.chunk_duration_seconds,
        )
        .await?;

        info!("Processing {} audio chunk(s) with {}", chunks.len(), self.model);

        let mut results: Vec<(usize, f64, Result<Vec<RawWord>>)> =
            stream::iter(chunks.into_iter().enumerate())
                .map(|(idx, (chunk_path, offset))| async move {
                    let result = self.transcribe_chunk(&chunk_path).await;
                    (idx, offset, result)
                })
                .buffer_unordered(self.max_concurrent_chunks)
                .collect()
                .await;

        results.sort_by_key(|(idx, _, _)| *idx);

        let mut all_words = Vec::new();
        let mut errors = Vec::new();

        for (idx, offset, result) in results {
            match result {
                Ok(words) => all_words.extend(words.into_iter().map(|mut w| {
                    w.start += offset;
                    w.end += offset;
                    w
                })),
                Err(e) => errors.push(format!("Chunk {} at {:.0}s: {}", idx, offset, e)),
            }
        }

        drop(temp_dir);

        if !errors.is_empty() {
            return Err(KlippError::TranscriptionFailed(format!(
                "{} chunk(s) failed:\n{}",
                errors.len(),
                errors.join("\n")
            )));
        }

        Ok(all_words)
    }
}

/// Check if the OpenAI API key is configured.
pub fn is_api_key_configured() -> bool {
    std::env::var("OPENAI_API_KEY").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spread_words() {
        let words = spread_words("one two three four", 10.0, 12.0);
        assert_eq!(words.len(), 4);
        assert_eq!(words[0].start, 10.0);
        assert_eq!(words[1].start, 10.5);
        assert_eq!(words[3].end, 12.0);
        assert!(spread_words("   ", 0.0, 1.0).is_empty());
    }
}

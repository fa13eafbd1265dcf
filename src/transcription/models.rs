//! Data models for transcription.

use crate::error::{KlippError, Result};
use serde::{Deserialize, Serialize};

/// A single word as reported by a speech-to-text engine, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWord {
    /// The word text.
    pub word: String,
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
}

impl RawWord {
    pub fn new(word: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            word: word.into(),
            start,
            end,
        }
    }
}

/// A normalized word with timing, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl TranscriptWord {
    /// Duration of this word in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Whether the word closes a sentence.
    pub fn ends_sentence(&self) -> bool {
        self.text.ends_with(['.', '!', '?'])
    }
}

/// An immutable, validated word-level transcript.
///
/// Start times are non-decreasing and no word has a negative duration.
/// The only way to obtain one is [`Transcript::from_words`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    words: Vec<TranscriptWord>,
}

impl Transcript {
    /// Normalize raw engine output into a transcript.
    ///
    /// Words whose text is empty after trimming are dropped. Fails with
    /// `InvalidTranscript` when nothing remains or when timings are invalid.
    pub fn from_words(raw: Vec<RawWord>) -> Result<Self> {
        let mut words: Vec<TranscriptWord> = Vec::with_capacity(raw.len());

        for (idx, w) in raw.into_iter().enumerate() {
            let text = w.word.trim();
            if text.is_empty() {
                continue;
            }

            if !w.start.is_finite() || !w.end.is_finite() || w.start < 0.0 {
                return Err(KlippError::InvalidTranscript(format!(
                    "word {} ({:?}) has invalid timing {}..{}",
                    idx, text, w.start, w.end
                )));
            }

            if w.end < w.start {
                return Err(KlippError::InvalidTranscript(format!(
                    "word {} ({:?}) has negative duration {}..{}",
                    idx, text, w.start, w.end
                )));
            }

            if let Some(prev) = words.last() {
                if w.start < prev.start {
                    return Err(KlippError::InvalidTranscript(format!(
                        "start times are not monotonic at word {} ({:.3} < {:.3})",
                        idx, w.start, prev.start
                    )));
                }
            }

            words.push(TranscriptWord {
                text: text.to_string(),
                start: w.start,
                end: w.end,
            });
        }

        if words.is_empty() {
            return Err(KlippError::InvalidTranscript("transcript is empty".into()));
        }

        Ok(Self { words })
    }

    /// All words, in time order.
    pub fn words(&self) -> &[TranscriptWord] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Total duration in seconds (end of the last word).
    pub fn duration(&self) -> f64 {
        self.words
            .iter()
            .map(|w| w.end)
            .fold(0.0, f64::max)
    }

    /// Words that intersect the half-open range `[start, end)`.
    pub fn words_between(&self, start: f64, end: f64) -> &[TranscriptWord] {
        let first = self
            .words
            .iter()
            .position(|w| w.end > start || w.start >= start)
            .unwrap_or(self.words.len());
        let last = self.words.partition_point(|w| w.start < end);
        if first >= last {
            return &[];
        }
        &self.words[first..last]
    }

    /// Flattened plain text.
    pub fn plain_text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Text between two timestamps.
    pub fn text_between(&self, start: f64, end: f64) -> String {
        self.words_between(start, end)
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Render as `[MM:SS - MM:SS] text` lines for prompting.
    ///
    /// A line closes after `max_words` words or at sentence punctuation.
    pub fn timestamped_lines(&self, max_words: usize) -> String {
        let max_words = max_words.max(1);
        let mut lines = Vec::new();
        let mut current: Vec<&TranscriptWord> = Vec::new();

        for word in &self.words {
            current.push(word);
            if current.len() >= max_words || word.ends_sentence() {
                lines.push(format_line(&current));
                current.clear();
            }
        }
        if !current.is_empty() {
            lines.push(format_line(&current));
        }

        lines.join("\n")
    }
}

fn format_line(words: &[&TranscriptWord]) -> String {
    let start = words.first().map(|w| w.start).unwrap_or(0.0);
    let end = words.last().map(|w| w.end).unwrap_or(start);
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "[{} - {}] {}",
        format_timestamp(start),
        format_timestamp(end),
        text
    )
}

/// Format seconds as MM:SS or HH:MM:SS.
pub fn format_timestamp(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

//! Subtitle cues derived from word timings.

use crate::transcription::TranscriptWord;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One on-screen subtitle chunk, with times relative to the clip start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleCue {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// Limits that close a cue. A word is never split across cues, so a single
/// word longer than `max_chars` still gets a cue of its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CuePolicy {
    pub max_chars: usize,
    pub max_words: usize,
    pub max_duration: f64,
    /// A pause at least this long between words starts a new cue.
    pub max_gap: f64,
}

impl Default for CuePolicy {
    fn default() -> Self {
        Self {
            max_chars: 32,
            max_words: 3,
            max_duration: 2.5,
            max_gap: 0.6,
        }
    }
}

/// Group the words of one clip into cues.
///
/// `words` are the transcript words intersecting `[clip_start, clip_end)`.
/// Cue times are shifted so the clip starts at zero and clamped to the clip.
pub fn build_cues(
    words: &[TranscriptWord],
    clip_start: f64,
    clip_end: f64,
    policy: &CuePolicy,
) -> Vec<SubtitleCue> {
    let clip_len = (clip_end - clip_start).max(0.0);
    let max_words = policy.max_words.max(1);

    let mut cues = Vec::new();
    let mut current: Vec<&TranscriptWord> = Vec::new();
    let mut chars = 0usize;

    for word in words {
        let word_chars = word.text.chars().count();

        if let (Some(first), Some(last)) = (current.first(), current.last()) {
            let overflow = current.len() >= max_words
                || chars + 1 + word_chars > policy.max_chars
                || word.end - first.start > policy.max_duration;
            let gap = word.start - last.end >= policy.max_gap;
            let sentence = last.ends_sentence();

            if overflow || gap || sentence {
                push_cue(&mut cues, &current, clip_start, clip_len);
                current.clear();
                chars = 0;
            }
        }

        chars += if current.is_empty() { word_chars } else { word_chars + 1 };
        current.push(word);
    }
    push_cue(&mut cues, &current, clip_start, clip_len);

    cues
}

fn push_cue(cues: &mut Vec<SubtitleCue>, words: &[&TranscriptWord], offset: f64, clip_len: f64) {
    let (Some(first), Some(last)) = (words.first(), words.last()) else {
        return;
    };

    let start = (first.start - offset).clamp(0.0, clip_len);
    let end = (last.end - offset).clamp(0.0, clip_len);
    if end <= start {
        return;
    }

    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    cues.push(SubtitleCue { text, start, end });
}

/// Render cues as an SRT document.
pub fn to_srt(cues: &[SubtitleCue]) -> String {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        let _ = writeln!(out, "{}", i + 1);
        let _ = writeln!(
            out,
            "{} --> {}",
            srt_timestamp(cue.start),
            srt_timestamp(cue.end)
        );
        let _ = writeln!(out, "{}", cue.text);
        out.push('\n');
    }
    out
}

fn srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, ms)
}

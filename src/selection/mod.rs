//! Segment selection: asking a language model for clip-worthy ranges.
//!
//! The selector renders the transcript into the selection prompt, calls the
//! model, validates the reply and filters the candidates against the
//! transcript and the duration bounds. A reply that is malformed, or that
//! leaves nothing after filtering, is retried with a corrective follow-up.

mod parse;

pub use parse::{extract_json, parse_response, parse_time, ParseError, ParseOutcome};

pub use crate::config::OverlapPolicy;

use crate::config::Prompts;
use crate::error::{KlippError, Result};
use crate::llm::{LanguageModel, Prompt};
use crate::transcription::{format_timestamp, Transcript};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How much of a rejected reply is quoted back to the model.
const PREVIOUS_REPLY_EXCERPT: usize = 1500;

/// A time range chosen as a candidate clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub label: String,
    pub score: Option<f64>,
    pub rank: Option<u32>,
}

impl Segment {
    pub fn new(start: f64, end: f64, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
            score: None,
            rank: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    fn overlaps(&self, other: &Segment) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Inclusive bounds on a clip's duration, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationBounds {
    pub min: f64,
    pub max: f64,
}

impl DurationBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, duration: f64) -> bool {
        duration >= self.min && duration <= self.max
    }
}

impl Default for DurationBounds {
    fn default() -> Self {
        Self::new(30.0, 60.0)
    }
}

/// How many times to ask the model and how long to wait in between.
///
/// The delay before attempt `n` (zero-based, `n >= 1`) is
/// `base_delay * 2^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay to sleep before the given attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(30))
    }
}

/// Post-filter knobs for the candidates a model returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterOptions {
    pub dedupe_tolerance: f64,
    pub overlap_policy: OverlapPolicy,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            dedupe_tolerance: 2.0,
            overlap_policy: OverlapPolicy::Reject,
        }
    }
}

/// Picks clip segments from a transcript with a language model.
pub struct SegmentSelector {
    model: Arc<dyn LanguageModel>,
    prompts: Prompts,
    retry: RetryPolicy,
    timeout: Duration,
    filter: FilterOptions,
    words_per_line: usize,
}

impl SegmentSelector {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self {
            model,
            prompts: Prompts::default(),
            retry: RetryPolicy::default(),
            timeout,
            filter: FilterOptions::default(),
            words_per_line: 8,
        }
    }

    /// Set custom prompts (with user-defined variables).
    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_filter(mut self, filter: FilterOptions) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_words_per_line(mut self, words: usize) -> Self {
        self.words_per_line = words.max(1);
        self
    }

    /// Select up to `max_clips` segments within `bounds`.
    ///
    /// Segments end no later than the transcript, nor than `media_duration`
    /// when the downloader could measure it. Never returns an empty list:
    /// running out of attempts without a usable segment is `SelectionFailed`.
    #[instrument(skip_all, fields(model = %self.model.name(), words = transcript.len()))]
    pub async fn select(
        &self,
        transcript: &Transcript,
        media_duration: Option<f64>,
        max_clips: usize,
        bounds: DurationBounds,
        cancel: &CancellationToken,
    ) -> Result<Vec<Segment>> {
        let duration = usable_duration(transcript.duration(), media_duration);
        let prompt = self.build_prompt(transcript, duration, max_clips, bounds);

        let mut request = prompt.clone();
        let mut last_error = String::from("no attempt was made");

        for attempt in 0..self.retry.max_attempts {
            if cancel.is_cancelled() {
                return Err(KlippError::Cancelled);
            }

            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                debug!("Waiting {:?} before attempt {}", delay, attempt + 1);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(KlippError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            info!(
                "Requesting segments (attempt {}/{})",
                attempt + 1,
                self.retry.max_attempts
            );

            let reply = tokio::select! {
                _ = cancel.cancelled() => return Err(KlippError::Cancelled),
                r = tokio::time::timeout(self.timeout, self.model.complete(&request, self.timeout)) => {
                    r.map_err(|_| KlippError::InferenceTimeout(self.timeout.as_secs()))??
                }
            };

            match parse_response(&reply) {
                ParseOutcome::Parsed(candidates) => {
                    let found = candidates.len();
                    let segments = filter_segments(candidates, duration, bounds, max_clips, &self.filter);
                    if !segments.is_empty() {
                        info!(
                            "Selected {} segment(s) from {} candidate(s)",
                            segments.len(),
                            found
                        );
                        return Ok(segments);
                    }
                    last_error = format!(
                        "none of the {} segment(s) lasted between {} and {} seconds inside the {:.0} second video",
                        found, bounds.min, bounds.max, duration
                    );
                }
                ParseOutcome::Invalid(e) => last_error = e.to_string(),
            }

            warn!("Attempt {} unusable: {}", attempt + 1, last_error);
            request = self.correction_prompt(&prompt, &reply, &last_error);
        }

        Err(KlippError::SelectionFailed(format!(
            "no usable segments after {} attempt(s): {}",
            self.retry.max_attempts, last_error
        )))
    }

    fn build_prompt(
        &self,
        transcript: &Transcript,
        duration: f64,
        max_clips: usize,
        bounds: DurationBounds,
    ) -> Prompt {
        let mut vars = HashMap::new();
        vars.insert(
            "transcript".to_string(),
            transcript.timestamped_lines(self.words_per_line),
        );
        vars.insert("max_clips".to_string(), max_clips.to_string());
        vars.insert("min_seconds".to_string(), format_seconds(bounds.min));
        vars.insert("max_seconds".to_string(), format_seconds(bounds.max));
        vars.insert("duration".to_string(), format_timestamp(duration));

        let templates = &self.prompts.selection;
        Prompt::new(
            self.prompts.render_with_custom(&templates.system, &vars),
            self.prompts.render_with_custom(&templates.user, &vars),
        )
    }

    fn correction_prompt(&self, original: &Prompt, previous: &str, error: &str) -> Prompt {
        let excerpt: String = previous.chars().take(PREVIOUS_REPLY_EXCERPT).collect();

        let mut vars = HashMap::new();
        vars.insert("prompt".to_string(), original.user.clone());
        vars.insert("previous".to_string(), excerpt);
        vars.insert("error".to_string(), error.to_string());

        Prompt::new(
            original.system.clone(),
            self.prompts
                .render_with_custom(&self.prompts.selection.correction, &vars),
        )
    }
}

/// The shorter of the transcript and the measured media, ignoring media
/// durations that are missing or nonsensical.
fn usable_duration(transcript: f64, media: Option<f64>) -> f64 {
    match media {
        Some(media) if media.is_finite() && media > 0.0 => transcript.min(media),
        _ => transcript,
    }
}

fn format_seconds(secs: f64) -> String {
    if secs.fract() == 0.0 {
        format!("{}", secs as i64)
    } else {
        format!("{:.1}", secs)
    }
}

/// Validate candidates against the transcript and bounds, order them by the
/// model's preference, drop duplicates and overlaps, and cap the count.
pub fn filter_segments(
    candidates: Vec<Segment>,
    transcript_duration: f64,
    bounds: DurationBounds,
    max_clips: usize,
    options: &FilterOptions,
) -> Vec<Segment> {
    let mut segments: Vec<Segment> = candidates
        .into_iter()
        .filter(|s| s.start < transcript_duration)
        .map(|mut s| {
            s.end = s.end.min(transcript_duration);
            s
        })
        .filter(|s| bounds.contains(s.duration()))
        .collect();

    order_by_preference(&mut segments);

    let mut accepted: Vec<Segment> = Vec::with_capacity(segments.len());
    for seg in segments {
        if accepted.iter().any(|a| is_duplicate(a, &seg, options.dedupe_tolerance)) {
            debug!("Dropping duplicate segment {:.1}-{:.1}", seg.start, seg.end);
            continue;
        }

        match options.overlap_policy {
            OverlapPolicy::Allow => accepted.push(seg),
            OverlapPolicy::Reject => {
                if accepted.iter().any(|a| a.overlaps(&seg)) {
                    debug!("Dropping overlapping segment {:.1}-{:.1}", seg.start, seg.end);
                } else {
                    accepted.push(seg);
                }
            }
            OverlapPolicy::Merge => match accepted.iter().position(|a| a.overlaps(&seg)) {
                None => accepted.push(seg),
                Some(idx) => {
                    let target = &mut accepted[idx];
                    let start = target.start.min(seg.start);
                    let end = target.end.max(seg.end);
                    if bounds.contains(end - start) {
                        target.start = start;
                        target.end = end;
                        target.score = max_option(target.score, seg.score);
                        target.rank = min_option(target.rank, seg.rank);
                    } else {
                        debug!("Merged segment would exceed bounds; dropping {:.1}-{:.1}", seg.start, seg.end);
                    }
                }
            },
        }
    }

    accepted.truncate(max_clips);
    accepted
}

/// Rank ascending when every segment has a rank, otherwise score descending
/// when every segment has a score, otherwise the model's own order.
fn order_by_preference(segments: &mut [Segment]) {
    if segments.iter().all(|s| s.rank.is_some()) {
        segments.sort_by_key(|s| s.rank);
    } else if segments.iter().all(|s| s.score.is_some()) {
        segments.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
        });
    }
}

fn is_duplicate(a: &Segment, b: &Segment, tolerance: f64) -> bool {
    (a.start - b.start).abs() <= tolerance && (a.end - b.end).abs() <= tolerance
}

fn max_option(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}

fn min_option(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{transcript_of, ScriptedModel};

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    fn selector(model: Arc<ScriptedModel>, attempts: u32) -> SegmentSelector {
        SegmentSelector::new(model, Duration::from_secs(5)).with_retry(fast_retry(attempts))
    }

    #[test]
    fn test_retry_policy_backoff() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.delay_before(0), Duration::ZERO);
        assert_eq!(policy.delay_before(1), Duration::from_millis(100));
        assert_eq!(policy.delay_before(2), Duration::from_millis(200));
        assert_eq!(policy.delay_before(3), Duration::from_millis(350));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_final_attempt() {
        let transcript = transcript_of(600, 300.0);
        let model = Arc::new(ScriptedModel::new(vec![
            "I think the best part is the intro".into(),
            r#"{"segments": [{"start": 10}]}"#.into(),
            r#"{"segments": [{"start": 10, "end": 50, "label": "good", "score": 0.9}]}"#.into(),
        ]));

        let segments = selector(model.clone(), 3)
            .select(&transcript, None, 3, DurationBounds::new(30.0, 60.0), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(model.calls(), 3);
        assert_eq!(segments, vec![Segment::new(10.0, 50.0, "good").with_score(0.9)]);

        let prompts = model.prompts();
        assert!(prompts[1].user.contains("could not be used"));
        assert!(prompts[2].user.contains("missing \"end\""));
    }

    #[tokio::test]
    async fn test_all_attempts_malformed() {
        let transcript = transcript_of(600, 300.0);
        let model = Arc::new(ScriptedModel::repeating("not json"));

        let err = selector(model.clone(), 4)
            .select(&transcript, None, 3, DurationBounds::new(30.0, 60.0), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, KlippError::SelectionFailed(_)));
        assert_eq!(model.calls(), 4);
    }

    #[tokio::test]
    async fn test_empty_after_filter_is_retried() {
        let transcript = transcript_of(600, 300.0);
        let model = Arc::new(ScriptedModel::new(vec![
            r#"{"segments": [{"start": 10, "end": 15}]}"#.into(),
            r#"{"segments": [{"start": 100, "end": 140}]}"#.into(),
        ]));

        let segments = selector(model.clone(), 3)
            .select(&transcript, None, 3, DurationBounds::new(30.0, 60.0), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(model.calls(), 2);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start, 100.0);
    }

    #[tokio::test]
    async fn test_inference_error_is_not_retried() {
        let transcript = transcript_of(100, 120.0);
        let model = Arc::new(ScriptedModel::failing());

        let err = selector(model.clone(), 3)
            .select(&transcript, None, 3, DurationBounds::new(30.0, 60.0), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, KlippError::InferenceFailed(_)));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_inference_timeout() {
        let transcript = transcript_of(100, 120.0);
        let model = Arc::new(ScriptedModel::hanging());

        let err = SegmentSelector::new(model, Duration::from_millis(20))
            .select(&transcript, None, 3, DurationBounds::new(30.0, 60.0), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, KlippError::InferenceTimeout(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let transcript = transcript_of(100, 120.0);
        let model = Arc::new(ScriptedModel::repeating("{}"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = selector(model.clone(), 3)
            .select(&transcript, None, 3, DurationBounds::new(30.0, 60.0), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_six_hundred_words_scenario() {
        // 600 words over 0-300 s, bounds [30, 60], at most 3 clips.
        let transcript = transcript_of(600, 300.0);
        let reply = r#"{"segments": [
            {"start": "00:00", "end": "00:45", "score": 0.7},
            {"start": "01:00", "end": "01:20", "score": 0.99},
            {"start": "02:00", "end": "02:55", "score": 0.9},
            {"start": "03:10", "end": "04:00", "score": 0.8},
            {"start": "04:45", "end": "05:40", "score": 0.95},
            {"start": "04:40", "end": "05:30", "score": 0.6},
            {"start": 400, "end": 440, "score": 1.0}
        ]}"#;
        let model = Arc::new(ScriptedModel::repeating(reply));

        let segments = selector(model, 1)
            .select(&transcript, None, 3, DurationBounds::new(30.0, 60.0), &CancellationToken::new())
            .await
            .unwrap();

        assert!(segments.len() <= 3);
        for s in &segments {
            assert!(s.start >= 0.0 && s.start < s.end && s.end <= 300.0);
            assert!((30.0..=60.0).contains(&s.duration()), "{s:?}");
        }
        // Highest scores first. Short ranges, including those cut short by the
        // end of the transcript, are gone, as is the one past the end.
        let starts: Vec<f64> = segments.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![120.0, 190.0, 0.0]);
    }

    #[tokio::test]
    async fn test_segments_end_inside_shorter_media() {
        // Whisper's last word runs to 300s but the video file is 270s long.
        let transcript = transcript_of(600, 300.0);
        let reply = r#"{"segments": [
            {"start": 200, "end": 255, "label": "inside"},
            {"start": 230, "end": 290, "label": "clamped"},
            {"start": 255, "end": 299, "label": "too short once clamped"},
            {"start": 280, "end": 299, "label": "past the end"}
        ]}"#;
        let model = Arc::new(ScriptedModel::repeating(reply));

        let segments = selector(model.clone(), 1)
            .with_filter(FilterOptions {
                dedupe_tolerance: 1.0,
                overlap_policy: OverlapPolicy::Allow,
            })
            .select(&transcript, Some(270.0), 5, DurationBounds::new(30.0, 60.0), &CancellationToken::new())
            .await
            .unwrap();

        let labels: Vec<&str> = segments.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["inside", "clamped"]);
        assert_eq!(segments[1].end, 270.0);
        assert!(model.prompts()[0].user.contains("The video is 04:30 long"));
    }

    #[test]
    fn test_usable_duration_ignores_bad_media_lengths() {
        assert_eq!(usable_duration(300.0, Some(270.0)), 270.0);
        assert_eq!(usable_duration(300.0, Some(320.0)), 300.0);
        assert_eq!(usable_duration(300.0, None), 300.0);
        assert_eq!(usable_duration(300.0, Some(f64::NAN)), 300.0);
        assert_eq!(usable_duration(300.0, Some(0.0)), 300.0);
    }

    #[test]
    fn test_end_clamped_to_duration() {
        let out = filter_segments(
            vec![Segment::new(250.0, 320.0, "tail")],
            300.0,
            DurationBounds::new(30.0, 60.0),
            5,
            &FilterOptions::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].end, 300.0);
    }

    #[test]
    fn test_dedupe_within_tolerance() {
        let out = filter_segments(
            vec![
                Segment::new(10.0, 50.0, "a"),
                Segment::new(11.0, 51.5, "b"),
                Segment::new(100.0, 140.0, "c"),
            ],
            300.0,
            DurationBounds::new(30.0, 60.0),
            5,
            &FilterOptions {
                dedupe_tolerance: 2.0,
                overlap_policy: OverlapPolicy::Allow,
            },
        );
        let labels: Vec<&str> = out.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "c"]);
    }

    fn overlapping() -> Vec<Segment> {
        vec![
            Segment::new(10.0, 45.0, "first"),
            Segment::new(30.0, 60.0, "second"),
            Segment::new(100.0, 130.0, "third"),
        ]
    }

    fn filter_with(policy: OverlapPolicy) -> Vec<Segment> {
        filter_segments(
            overlapping(),
            300.0,
            DurationBounds::new(30.0, 60.0),
            5,
            &FilterOptions {
                dedupe_tolerance: 1.0,
                overlap_policy: policy,
            },
        )
    }

    #[test]
    fn test_overlap_allow() {
        assert_eq!(filter_with(OverlapPolicy::Allow).len(), 3);
    }

    #[test]
    fn test_overlap_reject() {
        let out = filter_with(OverlapPolicy::Reject);
        let labels: Vec<&str> = out.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["first", "third"]);
    }

    #[test]
    fn test_overlap_merge() {
        let out = filter_with(OverlapPolicy::Merge);
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].start, out[0].end), (10.0, 60.0));
        assert_eq!(out[0].label, "first");
    }

    #[test]
    fn test_merge_that_breaks_bounds_drops_later_segment() {
        let out = filter_segments(
            vec![Segment::new(0.0, 50.0, "a"), Segment::new(40.0, 90.0, "b")],
            300.0,
            DurationBounds::new(30.0, 60.0),
            5,
            &FilterOptions {
                dedupe_tolerance: 1.0,
                overlap_policy: OverlapPolicy::Merge,
            },
        );
        assert_eq!(out, vec![Segment::new(0.0, 50.0, "a")]);
    }

    #[test]
    fn test_ordering_by_rank() {
        let mut a = Segment::new(0.0, 40.0, "a").with_score(0.9);
        a.rank = Some(2);
        let mut b = Segment::new(50.0, 90.0, "b").with_score(0.1);
        b.rank = Some(1);

        let out = filter_segments(
            vec![a, b],
            300.0,
            DurationBounds::new(30.0, 60.0),
            1,
            &FilterOptions::default(),
        );
        assert_eq!(out[0].label, "b");
    }

    #[test]
    fn test_mixed_scores_keep_model_order() {
        let out = filter_segments(
            vec![
                Segment::new(0.0, 40.0, "a"),
                Segment::new(50.0, 90.0, "b").with_score(0.9),
            ],
            300.0,
            DurationBounds::new(30.0, 60.0),
            5,
            &FilterOptions::default(),
        );
        assert_eq!(out[0].label, "a");
    }
}

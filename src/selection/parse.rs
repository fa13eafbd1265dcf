//! Turning free-form model replies into candidate segments.
//!
//! Models wrap JSON in prose, fence it in markdown, rename keys and write
//! times as `MM:SS` strings. Extraction is lenient about all of that; the
//! schema check on each segment is not.

use super::Segment;
use serde_json::{Map, Value};
use thiserror::Error;

/// Keys under which a model may return its segment list.
const LIST_KEYS: &[&str] = &[
    "segments",
    "most_relevant_segments",
    "clips",
    "relevant_segments",
    "top_segments",
];

const START_KEYS: &[&str] = &["start", "start_time", "start_seconds"];
const END_KEYS: &[&str] = &["end", "end_time", "end_seconds"];
const LABEL_KEYS: &[&str] = &["label", "reasoning", "title"];
const SCORE_KEYS: &[&str] = &["score", "relevance_score"];

/// Result of parsing one model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// Every segment passed the schema check. May be empty.
    Parsed(Vec<Segment>),
    /// The reply cannot be used as a whole.
    Invalid(ParseError),
}

/// Why a reply was rejected. The message is fed back to the model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("no JSON found in the reply")]
    NoJson,

    #[error("JSON has no segment list (expected a \"segments\" array)")]
    MissingList,

    #[error("segment {0} is not an object")]
    NotAnObject(usize),

    #[error("segment {index} is missing \"{field}\"")]
    MissingField { index: usize, field: &'static str },

    #[error("segment {index} has a non-numeric {field}: {value}")]
    BadTime {
        index: usize,
        field: &'static str,
        value: String,
    },

    #[error("segment {index} starts before zero ({start})")]
    NegativeStart { index: usize, start: f64 },

    #[error("segment {index} ends at {end}, not after its start {start}")]
    EmptyRange { index: usize, start: f64, end: f64 },

    #[error("segment {index} has score {score}, outside 0.0 to 1.0")]
    ScoreOutOfRange { index: usize, score: f64 },
}

/// Parse a raw model reply.
pub fn parse_response(text: &str) -> ParseOutcome {
    let Some(value) = extract_json(text) else {
        return ParseOutcome::Invalid(ParseError::NoJson);
    };

    let items = match segment_list(&value) {
        Some(items) => items,
        None => return ParseOutcome::Invalid(ParseError::MissingList),
    };

    let mut segments = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match parse_segment(index, item) {
            Ok(segment) => segments.push(segment),
            Err(e) => return ParseOutcome::Invalid(e),
        }
    }

    ParseOutcome::Parsed(segments)
}

fn segment_list(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => LIST_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array)),
        _ => None,
    }
}

fn parse_segment(index: usize, item: &Value) -> Result<Segment, ParseError> {
    let obj = item.as_object().ok_or(ParseError::NotAnObject(index))?;

    let start = required_time(obj, index, START_KEYS, "start")?;
    let end = required_time(obj, index, END_KEYS, "end")?;

    if start < 0.0 {
        return Err(ParseError::NegativeStart { index, start });
    }
    if end <= start {
        return Err(ParseError::EmptyRange { index, start, end });
    }

    let score = match first_of(obj, SCORE_KEYS) {
        None | Some(Value::Null) => None,
        Some(v) => {
            let score = v.as_f64().ok_or_else(|| ParseError::BadTime {
                index,
                field: "score",
                value: v.to_string(),
            })?;
            if !(0.0..=1.0).contains(&score) {
                return Err(ParseError::ScoreOutOfRange { index, score });
            }
            Some(score)
        }
    };

    let rank = obj
        .get("rank")
        .and_then(Value::as_u64)
        .and_then(|r| u32::try_from(r).ok());

    let label = first_of(obj, LABEL_KEYS)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    Ok(Segment {
        start,
        end,
        label,
        score,
        rank,
    })
}

fn first_of<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

fn required_time(
    obj: &Map<String, Value>,
    index: usize,
    keys: &[&str],
    field: &'static str,
) -> Result<f64, ParseError> {
    let value = first_of(obj, keys).ok_or(ParseError::MissingField { index, field })?;
    parse_time(value).ok_or_else(|| ParseError::BadTime {
        index,
        field,
        value: value.to_string(),
    })
}

/// Read a time in seconds from a JSON number or a `SS`, `MM:SS` or
/// `HH:MM:SS` string. Fractional seconds are kept.
pub fn parse_time(value: &Value) -> Option<f64> {
    let secs = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_time_str(s)?,
        _ => return None,
    };
    secs.is_finite().then_some(secs)
}

fn parse_time_str(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<f64>() {
        return Some(secs);
    }

    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() > 3 {
        return None;
    }

    let mut total = 0.0;
    for (i, part) in parts.iter().enumerate() {
        let last = i == parts.len() - 1;
        let v: f64 = if last {
            part.trim().parse().ok()?
        } else {
            part.trim().parse::<u32>().ok()? as f64
        };
        if v < 0.0 || (i > 0 && v >= 60.0) {
            return None;
        }
        total = total * 60.0 + v;
    }
    Some(total)
}

/// Find the first JSON value in `text`.
///
/// Tries the whole text, then fenced code blocks, then every balanced
/// `{...}` or `[...]` run in order of appearance.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() || v.is_array() {
            return Some(v);
        }
    }

    for block in fenced_blocks(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(block.trim()) {
            return Some(v);
        }
    }

    let bytes = trimmed.as_bytes();
    let mut from = 0;
    while let Some(offset) = trimmed[from..].find(['{', '[']) {
        let start = from + offset;
        if let Some(end) = balanced_end(bytes, start) {
            if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Some(v);
            }
        }
        from = start + 1;
    }

    None
}

/// Contents of ``` fenced blocks, skipping an optional language tag.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = match after.find('\n') {
            Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => nl + 1,
            _ => 0,
        };
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(&body[..close]);
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// Index of the bracket closing the one at `start`, ignoring brackets in strings.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parsed(text: &str) -> Vec<Segment> {
        match parse_response(text) {
            ParseOutcome::Parsed(s) => s,
            ParseOutcome::Invalid(e) => panic!("unexpected invalid: {e}"),
        }
    }

    fn invalid(text: &str) -> ParseError {
        match parse_response(text) {
            ParseOutcome::Invalid(e) => e,
            ParseOutcome::Parsed(s) => panic!("unexpected parse: {s:?}"),
        }
    }

    #[test]
    fn test_plain_json() {
        let segs = parsed(r#"{"segments":[{"start":10,"end":45.5,"label":"hook","score":0.8}]}"#);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].start, 10.0);
        assert_eq!(segs[0].end, 45.5);
        assert_eq!(segs[0].label, "hook");
        assert_eq!(segs[0].score, Some(0.8));
        assert_eq!(segs[0].rank, None);
    }

    #[test]
    fn test_fenced_block_with_prose() {
        let text = "Sure! Here are the clips:\n```json\n{\"clips\": [{\"start_time\": \"00:10\", \"end_time\": \"01:20\", \"reasoning\": \"strong\"}]}\n```\nLet me know.";
        let segs = parsed(text);
        assert_eq!(segs[0].start, 10.0);
        assert_eq!(segs[0].end, 80.0);
        assert_eq!(segs[0].label, "strong");
    }

    #[test]
    fn test_embedded_object() {
        let text = r#"I picked these {"most_relevant_segments": [{"start": "1:02:03", "end": "1:02:50.5", "rank": 1}]} hope it helps"#;
        let segs = parsed(text);
        assert_eq!(segs[0].start, 3723.0);
        assert_eq!(segs[0].end, 3770.5);
        assert_eq!(segs[0].rank, Some(1));
    }

    #[test]
    fn test_bare_array() {
        let segs = parsed(r#"[{"start": 0, "end": 30}, {"start": 40, "end": 90}]"#);
        assert_eq!(segs.len(), 2);
    }

    #[test]
    fn test_brackets_inside_strings() {
        let text = r#"note {"segments": [{"start": 1, "end": 40, "label": "a } tricky ] label"}]}"#;
        assert_eq!(parsed(text)[0].label, "a } tricky ] label");
    }

    #[test]
    fn test_empty_list_is_parsed() {
        let segs = parsed(r#"{"most_relevant_segments": [], "error": "too short"}"#);
        assert!(segs.is_empty());
    }

    #[test]
    fn test_schema_violations() {
        assert_eq!(invalid("no json here"), ParseError::NoJson);
        assert_eq!(invalid(r#"{"summary": "x"}"#), ParseError::MissingList);
        assert_eq!(
            invalid(r#"{"segments":[{"end": 10}]}"#),
            ParseError::MissingField { index: 0, field: "start" }
        );
        assert!(matches!(
            invalid(r#"{"segments":[{"start": "soon", "end": 10}]}"#),
            ParseError::BadTime { field: "start", .. }
        ));
        assert!(matches!(
            invalid(r#"{"segments":[{"start": -1, "end": 10}]}"#),
            ParseError::NegativeStart { .. }
        ));
        assert!(matches!(
            invalid(r#"{"segments":[{"start": 10, "end": 10}]}"#),
            ParseError::EmptyRange { .. }
        ));
        assert!(matches!(
            invalid(r#"{"segments":[{"start": 0, "end": 40, "score": 1.5}]}"#),
            ParseError::ScoreOutOfRange { .. }
        ));
    }

    #[test]
    fn test_one_bad_segment_invalidates_reply() {
        let text = r#"{"segments":[{"start": 0, "end": 40}, {"start": 50}]}"#;
        assert_eq!(
            invalid(text),
            ParseError::MissingField { index: 1, field: "end" }
        );
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time(&json!(12.5)), Some(12.5));
        assert_eq!(parse_time(&json!("42")), Some(42.0));
        assert_eq!(parse_time(&json!("01:05")), Some(65.0));
        assert_eq!(parse_time(&json!("01:01:05")), Some(3665.0));
        assert_eq!(parse_time(&json!("00:61")), None);
        assert_eq!(parse_time(&json!("a:b")), None);
        assert_eq!(parse_time(&json!(null)), None);
    }
}

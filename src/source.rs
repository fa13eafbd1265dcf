//! Source references and downloaded media handles.
//!
//! A task is submitted with a [`SourceRef`]: either a remote URL that a
//! downloader understands (YouTube and anything else yt-dlp supports) or a
//! path to a file that is already on disk.

use crate::error::{KlippError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Supported video file extensions for local sources.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "webm", "flv", "wmv", "m4v", "mpeg", "mpg", "3gp",
];

/// Where the source video comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SourceRef {
    /// Remote URL handed to the downloader.
    Url(String),
    /// A file already present on the local filesystem.
    LocalFile(PathBuf),
}

impl SourceRef {
    /// Parse user input into a source reference.
    ///
    /// Bare 11-character YouTube IDs are expanded to watch URLs.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(KlippError::InvalidInput("source reference is empty".into()));
        }

        if let Ok(parsed) = url::Url::parse(input) {
            if matches!(parsed.scheme(), "http" | "https") {
                return Ok(SourceRef::Url(input.to_string()));
            }
            if parsed.scheme() == "file" {
                let path = parsed.to_file_path().map_err(|_| {
                    KlippError::InvalidInput(format!("Invalid file URL: {}", input))
                })?;
                return Ok(SourceRef::LocalFile(path));
            }
        }

        let path = PathBuf::from(shellexpand::tilde(input).to_string());
        if path.exists() || is_video_file(&path) {
            return Ok(SourceRef::LocalFile(path));
        }

        if youtube_id_regex().is_match(input) {
            return Ok(SourceRef::Url(format!(
                "https://www.youtube.com/watch?v={}",
                input
            )));
        }

        Err(KlippError::InvalidInput(format!(
            "Could not parse input as a URL or video file: {}",
            input
        )))
    }

    /// Whether the reference carries no usable location.
    pub fn is_empty(&self) -> bool {
        match self {
            SourceRef::Url(url) => url.trim().is_empty(),
            SourceRef::LocalFile(path) => path.as_os_str().is_empty(),
        }
    }

    /// Short identifier used for file naming.
    pub fn slug(&self) -> String {
        match self {
            SourceRef::Url(url) => youtube_video_id(url).unwrap_or_else(|| {
                url.rsplit('/')
                    .find(|s| !s.is_empty())
                    .unwrap_or("source")
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
                    .take(32)
                    .collect()
            }),
            SourceRef::LocalFile(path) => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("source")
                .to_string(),
        }
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceRef::Url(url) => write!(f, "{}", url),
            SourceRef::LocalFile(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A downloaded (or local) media file ready for transcription and rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaHandle {
    pub path: PathBuf,
    /// Duration in seconds, when the downloader could determine it.
    pub duration_seconds: Option<f64>,
}

impl MediaHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            duration_seconds: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}

/// Check if path has a supported video extension.
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn youtube_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]{11}$").expect("valid regex"))
}

/// Extract the video ID from a YouTube URL.
pub fn youtube_video_id(input: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            (?:https?://)?
            (?:www\.|m\.)?
            (?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/shorts/|youtube\.com/v/)
            ([a-zA-Z0-9_-]{11})
        ",
        )
        .expect("valid regex")
    });

    re.captures(input.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        let src = SourceRef::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
        assert_eq!(
            src,
            SourceRef::Url("https://www.youtube.com/watch?v=dQw4w9WgXcQ".into())
        );
        assert_eq!(src.slug(), "dQw4w9WgXcQ");
    }

    #[test]
    fn test_parse_bare_youtube_id() {
        let src = SourceRef::parse("dQw4w9WgXcQ").unwrap();
        assert_eq!(
            src,
            SourceRef::Url("https://www.youtube.com/watch?v=dQw4w9WgXcQ".into())
        );
    }

    #[test]
    fn test_parse_local_file() {
        let src = SourceRef::parse("/videos/talk.mp4").unwrap();
        assert_eq!(src, SourceRef::LocalFile(PathBuf::from("/videos/talk.mp4")));
        assert_eq!(src.slug(), "talk");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SourceRef::parse("").is_err());
        assert!(SourceRef::parse("not a thing").is_err());
    }

    #[test]
    fn test_youtube_video_id() {
        assert_eq!(
            youtube_video_id("https://youtu.be/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(youtube_video_id("https://example.com/video"), None);
    }
}

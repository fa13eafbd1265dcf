//! Video download via yt-dlp.

use super::{ffmpeg, Downloader};
use crate::error::{KlippError, Result};
use crate::source::{is_video_file, MediaHandle, SourceRef};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Default yt-dlp format selector: best mp4 video up to 1080p with m4a audio.
pub const DEFAULT_FORMAT: &str =
    "bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]/best[height<=1080][ext=mp4]/best";

/// Downloads URL sources with yt-dlp and passes local files through.
pub struct SourceDownloader {
    output_dir: PathBuf,
    format: String,
}

impl SourceDownloader {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self::with_format(output_dir, DEFAULT_FORMAT)
    }

    pub fn with_format(output_dir: impl Into<PathBuf>, format: &str) -> Self {
        Self {
            output_dir: output_dir.into(),
            format: format.to_string(),
        }
    }

    /// Downloads a video URL and saves it as MP4.
    ///
    /// If the file already exists it is returned without re-downloading.
    #[instrument(skip(self), fields(slug = %slug))]
    async fn download_url(&self, url: &str, slug: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;

        let target_path = self.output_dir.join(format!("{}.mp4", slug));
        if target_path.exists() {
            info!("Using cached video file");
            return Ok(target_path);
        }

        info!("Downloading video from {}", url);

        let template = self.output_dir.join(format!("{}.%(ext)s", slug));

        let result = Command::new("yt-dlp")
            .arg("--format").arg(&self.format)
            .arg("--merge-output-format").arg("mp4")
            .arg("--output").arg(&template)
            .arg("--no-playlist")
            .arg("--quiet")
            .arg("--no-warnings")
            .arg(url)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match result {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KlippError::ToolNotFound("yt-dlp".into()));
            }
            Err(e) => {
                return Err(KlippError::DownloadFailed(format!("yt-dlp execution failed: {e}")));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KlippError::DownloadFailed(format!("yt-dlp failed: {}", stderr.trim())));
        }

        find_video_file(&self.output_dir, slug)
    }
}

#[async_trait]
impl Downloader for SourceDownloader {
    async fn fetch(&self, source: &SourceRef) -> Result<MediaHandle> {
        let path = match source {
            SourceRef::Url(url) => self.download_url(url, &source.slug()).await?,
            SourceRef::LocalFile(path) => {
                if !path.is_file() {
                    return Err(KlippError::DownloadFailed(format!(
                        "File not found: {}",
                        path.display()
                    )));
                }
                if !is_video_file(path) {
                    warn!("{} does not have a known video extension", path.display());
                }
                path.clone()
            }
        };

        let duration_seconds = match ffmpeg::media_duration(&path).await {
            Ok(d) => Some(d),
            Err(e) => {
                debug!("Could not read duration: {}", e);
                None
            }
        };

        Ok(MediaHandle {
            path,
            duration_seconds,
        })
    }
}

/// Locates a downloaded video file by slug.
fn find_video_file(dir: &Path, slug: &str) -> Result<PathBuf> {
    for ext in &["mp4", "mkv", "webm", "mov"] {
        let candidate = dir.join(format!("{}.{}", slug, ext));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let entries = std::fs::read_dir(dir)
        .map_err(|e| KlippError::DownloadFailed(format!("Cannot read directory: {e}")))?;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(slug) && !name.ends_with(".part") {
            return Ok(entry.path());
        }
    }

    Err(KlippError::DownloadFailed("Video file not found after download".into()))
}

//! On-disk cache of transcription results.

use super::{RawWord, Transcriber};
use crate::error::Result;
use crate::source::MediaHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    source: PathBuf,
    words: Vec<RawWord>,
}

/// Wraps a transcriber and keeps its output next to other downloads, so a
/// video submitted again skips speech-to-text.
///
/// Entries are keyed by the media file's stem and size. Unreadable entries
/// are treated as misses and failed writes only log.
pub struct CachedTranscriber {
    inner: Arc<dyn Transcriber>,
    cache_dir: PathBuf,
}

impl CachedTranscriber {
    pub fn new(inner: Arc<dyn Transcriber>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            cache_dir: cache_dir.into(),
        }
    }

    fn entry_path(&self, media: &Path) -> Option<PathBuf> {
        let stem = media.file_stem()?.to_str()?;
        let size = std::fs::metadata(media).ok()?.len();
        Some(self.cache_dir.join(format!("{}-{}.transcript.json", stem, size)))
    }

    fn load(path: &Path) -> Option<Vec<RawWord>> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) if !entry.words.is_empty() => Some(entry.words),
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring unreadable transcript cache {:?}: {}", path, e);
                None
            }
        }
    }

    fn store(&self, path: &Path, media: &Path, words: &[RawWord]) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let entry = CacheEntry {
            source: media.to_path_buf(),
            words: words.to_vec(),
        };
        std::fs::write(path, serde_json::to_string(&entry)?)?;
        Ok(())
    }
}

#[async_trait]
impl Transcriber for CachedTranscriber {
    async fn transcribe(&self, media: &MediaHandle) -> Result<Vec<RawWord>> {
        let Some(path) = self.entry_path(&media.path) else {
            debug!("No cache key for {:?}", media.path);
            return self.inner.transcribe(media).await;
        };

        if let Some(words) = Self::load(&path) {
            info!("Using cached transcript ({} words)", words.len());
            return Ok(words);
        }

        let words = self.inner.transcribe(media).await?;
        if !words.is_empty() {
            match self.store(&path, &media.path, &words) {
                Ok(()) => debug!("Cached {} words to {:?}", words.len(), path),
                Err(e) => warn!("Failed to write transcript cache {:?}: {}", path, e),
            }
        }
        Ok(words)
    }
}

//! Media acquisition and ffmpeg utilities.
//!
//! The [`Downloader`] trait is the pipeline's view of "give me a local file
//! for this source". [`SourceDownloader`] is the production implementation:
//! URLs go through yt-dlp, local files are validated and passed through.

mod downloader;
pub mod ffmpeg;

pub use downloader::{SourceDownloader, DEFAULT_FORMAT};

use crate::error::Result;
use crate::source::{MediaHandle, SourceRef};
use async_trait::async_trait;

/// Trait for fetching source media to the local filesystem.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch the source and return a handle to a local media file.
    async fn fetch(&self, source: &SourceRef) -> Result<MediaHandle>;
}

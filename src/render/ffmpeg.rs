//! Clip rendering with ffmpeg.

use super::{cues::to_srt, Compositor, RenderRequest};
use crate::error::{KlippError, Result};
use crate::media::ffmpeg::{escape_filter_path, run};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

const FRAME_RATE: u32 = 30;
const AUDIO_RATE: u32 = 44100;

/// Cuts, reframes and subtitles clips by shelling out to ffmpeg.
pub struct FfmpegCompositor {
    width: u32,
    height: u32,
    font_size: u32,
}

impl FfmpegCompositor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            font_size: 18,
        }
    }

    pub fn with_font_size(mut self, size: u32) -> Self {
        self.font_size = size;
        self
    }

    /// Scale to cover the frame, then crop to it.
    fn frame_filter(&self) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1,fps={FRAME_RATE}",
            w = self.width,
            h = self.height
        )
    }

    fn body_filter(&self, srt: Option<&Path>) -> String {
        let mut vf = self.frame_filter();
        if let Some(path) = srt {
            vf.push_str(&format!(
                ",subtitles=filename='{}':charenc=UTF-8:force_style='FontSize={},Alignment=2,Outline=2,MarginV=60'",
                escape_filter_path(path),
                self.font_size
            ));
        }
        vf
    }

    /// Render the segment itself, with burned-in subtitles.
    async fn render_body(&self, request: &RenderRequest, srt: Option<&Path>, output: &Path) -> Result<()> {
        let start = format!("{:.3}", request.start);
        let duration = format!("{:.3}", request.end - request.start);
        let vf = self.body_filter(srt);
        let audio_filter = format!("aresample={AUDIO_RATE}");

        let args: Vec<&OsStr> = vec![
            OsStr::new("-ss"),
            OsStr::new(&start),
            OsStr::new("-t"),
            OsStr::new(&duration),
            OsStr::new("-i"),
            request.media.path.as_os_str(),
            OsStr::new("-vf"),
            OsStr::new(&vf),
            OsStr::new("-af"),
            OsStr::new(&audio_filter),
            OsStr::new("-map"),
            OsStr::new("0:v:0"),
            OsStr::new("-map"),
            OsStr::new("0:a:0?"),
            OsStr::new("-c:v"),
            OsStr::new("libx264"),
            OsStr::new("-preset"),
            OsStr::new("veryfast"),
            OsStr::new("-crf"),
            OsStr::new("20"),
            OsStr::new("-pix_fmt"),
            OsStr::new("yuv420p"),
            OsStr::new("-c:a"),
            OsStr::new("aac"),
            OsStr::new("-b:a"),
            OsStr::new("160k"),
            OsStr::new("-movflags"),
            OsStr::new("+faststart"),
            output.as_os_str(),
        ];

        run(args, KlippError::RenderFailed).await
    }

    /// Prepend the transition to an already rendered body.
    ///
    /// Transition assets often have no audio track, so silence is generated
    /// for that part of the concat.
    async fn prepend_transition(
        &self,
        transition: &Path,
        seconds: f64,
        body: &Path,
        output: &Path,
    ) -> Result<()> {
        let seconds = format!("{:.3}", seconds);
        let silence = format!("anullsrc=r={AUDIO_RATE}:cl=stereo");
        let filter = format!(
            "[0:v]{frame},format=yuv420p[v0];\
             [1:v]format=yuv420p[v1];\
             [2:a]aresample={AUDIO_RATE}[a0];\
             [1:a]aresample={AUDIO_RATE}[a1];\
             [v0][a0][v1][a1]concat=n=2:v=1:a=1[v][a]",
            frame = self.frame_filter()
        );

        let args: Vec<&OsStr> = vec![
            OsStr::new("-t"),
            OsStr::new(&seconds),
            OsStr::new("-i"),
            transition.as_os_str(),
            OsStr::new("-i"),
            body.as_os_str(),
            OsStr::new("-f"),
            OsStr::new("lavfi"),
            OsStr::new("-t"),
            OsStr::new(&seconds),
            OsStr::new("-i"),
            OsStr::new(&silence),
            OsStr::new("-filter_complex"),
            OsStr::new(&filter),
            OsStr::new("-map"),
            OsStr::new("[v]"),
            OsStr::new("-map"),
            OsStr::new("[a]"),
            OsStr::new("-c:v"),
            OsStr::new("libx264"),
            OsStr::new("-preset"),
            OsStr::new("veryfast"),
            OsStr::new("-crf"),
            OsStr::new("20"),
            OsStr::new("-c:a"),
            OsStr::new("aac"),
            OsStr::new("-b:a"),
            OsStr::new("160k"),
            OsStr::new("-movflags"),
            OsStr::new("+faststart"),
            output.as_os_str(),
        ];

        run(args, KlippError::RenderFailed).await
    }
}

#[async_trait]
impl Compositor for FfmpegCompositor {
    #[instrument(skip_all, fields(output = %request.output.display()))]
    async fn render(&self, request: &RenderRequest) -> Result<PathBuf> {
        if request.end <= request.start {
            return Err(KlippError::RenderFailed(format!(
                "empty range {:.3}..{:.3}",
                request.start, request.end
            )));
        }

        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let work_dir = tempfile::tempdir()?;

        let srt_path = if request.cues.is_empty() {
            None
        } else {
            let path = work_dir.path().join("subtitles.srt");
            tokio::fs::write(&path, to_srt(&request.cues)).await?;
            Some(path)
        };

        match &request.transition {
            None => {
                self.render_body(request, srt_path.as_deref(), &request.output)
                    .await?
            }
            Some(transition) => {
                let body = work_dir.path().join("body.mp4");
                self.render_body(request, srt_path.as_deref(), &body).await?;
                debug!("Adding transition {}", transition.path.display());
                self.prepend_transition(
                    &transition.path,
                    transition.max_seconds,
                    &body,
                    &request.output,
                )
                .await?;
            }
        }

        info!("Rendered clip ({} cues)", request.cues.len());
        Ok(request.output.clone())
    }
}

//! Run command: submit a task and follow it to the end.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::ClipService;
use crate::source::SourceRef;
use crate::task::Stage;
use anyhow::Result;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Per-run overrides of the selection settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunOverrides {
    pub max_clips: Option<usize>,
    pub min_seconds: Option<f64>,
    pub max_seconds: Option<f64>,
}

impl RunOverrides {
    fn apply(&self, settings: &mut Settings) {
        if let Some(n) = self.max_clips {
            settings.selection.max_clips_per_task = n;
        }
        if let Some(min) = self.min_seconds {
            settings.selection.min_segment_seconds = min;
        }
        if let Some(max) = self.max_seconds {
            settings.selection.max_segment_seconds = max;
        }
    }
}

/// Run the run command.
pub async fn run_task(
    source: &str,
    owner: &str,
    overrides: RunOverrides,
    mut settings: Settings,
) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Run, &settings).await {
        Output::error(&format!("{}", e));
        Output::info("Run 'klipp doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    overrides.apply(&mut settings);
    let source = SourceRef::parse(source)?;
    let service = ClipService::from_settings(&settings)?;

    let id = service.submit_task(source.clone(), owner).await?;
    Output::info(&format!("Task {} submitted for {}", id, source));

    let pb = Output::progress_bar("queued");
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelling = false;

    let snapshot = loop {
        tokio::select! {
            _ = &mut ctrl_c, if !cancelling => {
                cancelling = true;
                pb.set_message("cancelling...");
                service.cancel_task(id).await?;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let snapshot = service.get_progress(id).await?;
        pb.set_position(snapshot.percent as u64);
        if !cancelling {
            pb.set_message(snapshot.message.clone());
        }
        if snapshot.is_terminal() {
            break snapshot;
        }
    };
    pb.finish_and_clear();

    match snapshot.stage {
        Stage::Completed => {
            let clips = service.get_clips(id).await?;
            Output::success(&format!(
                "Rendered {} of {} clip(s)",
                snapshot.clips_rendered, snapshot.clips_planned
            ));
            for clip in &clips {
                Output::clip(clip);
            }
            Ok(())
        }
        _ => {
            let cause = snapshot.error.unwrap_or_else(|| "unknown error".into());
            Output::error(&format!("Task {} failed: {}", id, cause));
            Err(anyhow::anyhow!(cause))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let mut settings = Settings::default();
        RunOverrides {
            max_clips: Some(2),
            min_seconds: None,
            max_seconds: Some(45.0),
        }
        .apply(&mut settings);

        assert_eq!(settings.selection.max_clips_per_task, 2);
        assert_eq!(settings.selection.min_segment_seconds, 30.0);
        assert_eq!(settings.selection.max_segment_seconds, 45.0);
    }
}

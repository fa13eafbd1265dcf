//! Status and clips commands.

use super::parse_task_id;
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::ClipService;
use anyhow::Result;

/// Run the status command.
pub async fn run_status(task_id: &str, json: bool, settings: Settings) -> Result<()> {
    let id = parse_task_id(task_id)?;
    let service = ClipService::from_settings(&settings)?;
    let snapshot = service.get_progress(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        Output::header(&format!("Task {}", id));
        Output::snapshot(&snapshot);
    }
    Ok(())
}

/// Run the clips command.
pub async fn run_clips(task_id: &str, json: bool, settings: Settings) -> Result<()> {
    let id = parse_task_id(task_id)?;
    let service = ClipService::from_settings(&settings)?;
    let clips = service.get_clips(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&clips)?);
    } else if clips.is_empty() {
        Output::info("No rendered clips for this task.");
    } else {
        Output::header(&format!("Clips ({})", clips.len()));
        for clip in &clips {
            Output::clip(clip);
        }
    }
    Ok(())
}

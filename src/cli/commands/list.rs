//! List and recover commands.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::ClipService;
use anyhow::Result;

/// Run the list command.
pub async fn run_list(limit: usize, settings: Settings) -> Result<()> {
    let service = ClipService::from_settings(&settings)?;
    let tasks = service.list_tasks().await?;

    if tasks.is_empty() {
        Output::info("No tasks yet. Use 'klipp run <source>' to create one.");
        return Ok(());
    }

    Output::header(&format!("Tasks ({})", tasks.len()));
    println!();
    for task in tasks.iter().take(limit) {
        Output::task_line(task);
    }
    if tasks.len() > limit {
        println!();
        Output::kv("Not shown", &(tasks.len() - limit).to_string());
    }
    Ok(())
}

/// Run the recover command.
pub async fn run_recover(settings: Settings) -> Result<()> {
    let service = ClipService::from_settings(&settings)?;
    let recovered = service.recover_interrupted().await?;

    if recovered.is_empty() {
        Output::success("No unfinished tasks found.");
    } else {
        Output::warning(&format!("Marked {} task(s) as interrupted:", recovered.len()));
        for id in &recovered {
            println!("  {}", id);
        }
    }
    Ok(())
}

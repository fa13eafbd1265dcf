//! CLI output formatting utilities.

use crate::task::{Clip, ProgressSnapshot, Stage, Task};
use crate::transcription::format_timestamp;
use console::{style, StyledObject};
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print one line per task.
    pub fn task_line(task: &Task) {
        println!(
            "  {} {} {} ({}, {})",
            style("*").cyan(),
            style(task.id).dim(),
            stage_style(task.stage),
            content_preview(&task.source.to_string(), 60),
            task.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    /// Print a progress snapshot.
    pub fn snapshot(snapshot: &ProgressSnapshot) {
        Output::kv("Stage", &stage_style(snapshot.stage).to_string());
        Output::kv("Progress", &format!("{}%", snapshot.percent));
        Output::kv("Status", &snapshot.message);
        if snapshot.clips_planned > 0 {
            Output::kv(
                "Clips",
                &format!("{}/{}", snapshot.clips_rendered, snapshot.clips_planned),
            );
        }
        if let Some(error) = &snapshot.error {
            Output::kv("Error", &style(error).red().to_string());
        }
    }

    /// Print one rendered clip.
    pub fn clip(clip: &Clip) {
        let path = clip
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!(
            "  {} {} [{} - {}] {}",
            style(format!("#{}", clip.segment_index + 1)).cyan(),
            style(&clip.segment.label).bold(),
            format_timestamp(clip.segment.start),
            format_timestamp(clip.segment.end),
            style(path).dim()
        );
    }

    /// Create a percentage progress bar.
    pub fn progress_bar(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

fn stage_style(stage: Stage) -> StyledObject<&'static str> {
    let name = style(stage.as_str());
    match stage {
        Stage::Completed => name.green(),
        Stage::Failed => name.red(),
        Stage::Queued => name.dim(),
        _ => name.yellow(),
    }
}

/// Truncate content with ellipsis.
fn content_preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_chars {
        content
    } else {
        let cut: String = content.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_preview() {
        assert_eq!(content_preview("short", 10), "short");
        assert_eq!(content_preview("a\nb", 10), "a b");
        assert_eq!(content_preview("abcdefghij", 4), "abcd...");
    }
}

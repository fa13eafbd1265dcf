//! Poll-friendly progress snapshots.

use super::{Stage, Task, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Percent at the start of rendering; finished segments move it towards
/// [`RENDER_END_PERCENT`].
const RENDER_START_PERCENT: u8 = 60;
const RENDER_END_PERCENT: u8 = 95;

/// What a polling client sees of a task.
///
/// Regenerated on every transition and after every rendered segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub task_id: TaskId,
    pub stage: Stage,
    /// Progress percentage (0-100).
    pub percent: u8,
    pub message: String,
    pub clips_rendered: usize,
    pub clips_planned: usize,
    pub error: Option<String>,
    /// Monotonically increasing per task.
    pub sequence: u64,
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// Clip counters during and after rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClipCounts {
    /// Segments planned for rendering.
    pub planned: usize,
    /// Segments finished, successfully or not.
    pub finished: usize,
    /// Segments rendered successfully.
    pub rendered: usize,
}

/// Projects task state into snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressReporter;

impl ProgressReporter {
    /// Build the next snapshot for `task`.
    ///
    /// `previous` supplies the sequence to continue from and, for failed
    /// tasks, the percent to keep.
    pub fn snapshot(
        task: &Task,
        counts: ClipCounts,
        previous: Option<&ProgressSnapshot>,
    ) -> ProgressSnapshot {
        let last_percent = previous.map(|p| p.percent).unwrap_or(0);

        let percent = match task.stage {
            Stage::Queued => 0,
            Stage::Downloading => 5,
            Stage::Transcribing => 20,
            Stage::Selecting => 45,
            Stage::Rendering => render_percent(counts),
            Stage::Completed => 100,
            Stage::Failed => last_percent,
        };

        ProgressSnapshot {
            task_id: task.id,
            stage: task.stage,
            percent,
            message: message(task, counts),
            clips_rendered: counts.rendered,
            clips_planned: counts.planned,
            error: task.error.clone(),
            sequence: previous.map(|p| p.sequence + 1).unwrap_or(0),
            updated_at: Utc::now(),
        }
    }
}

fn render_percent(counts: ClipCounts) -> u8 {
    if counts.planned == 0 {
        return RENDER_START_PERCENT;
    }
    let span = (RENDER_END_PERCENT - RENDER_START_PERCENT) as usize;
    let done = counts.finished.min(counts.planned);
    RENDER_START_PERCENT + (span * done / counts.planned) as u8
}

fn message(task: &Task, counts: ClipCounts) -> String {
    match task.stage {
        Stage::Queued => "Waiting to start".to_string(),
        Stage::Downloading => "Downloading source video".to_string(),
        Stage::Transcribing => "Transcribing audio".to_string(),
        Stage::Selecting => "Selecting segments".to_string(),
        Stage::Rendering => format!(
            "Rendering clips ({}/{} done)",
            counts.finished, counts.planned
        ),
        Stage::Completed => format!(
            "Rendered {} of {} clip(s)",
            counts.rendered, counts.planned
        ),
        Stage::Failed => format!(
            "Failed: {}",
            task.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceRef;

    fn task_at(stage: Stage) -> Task {
        let mut task = Task::new(SourceRef::Url("https://example.com/v".into()), "bob");
        task.stage = stage;
        task
    }

    #[test]
    fn test_percent_by_stage() {
        let none = ClipCounts::default();
        assert_eq!(ProgressReporter::snapshot(&task_at(Stage::Queued), none, None).percent, 0);
        assert_eq!(ProgressReporter::snapshot(&task_at(Stage::Downloading), none, None).percent, 5);
        assert_eq!(ProgressReporter::snapshot(&task_at(Stage::Selecting), none, None).percent, 45);
        assert_eq!(ProgressReporter::snapshot(&task_at(Stage::Completed), none, None).percent, 100);
    }

    #[test]
    fn test_rendering_percent_is_linear() {
        let task = task_at(Stage::Rendering);
        let at = |finished| {
            ProgressReporter::snapshot(
                &task,
                ClipCounts {
                    planned: 5,
                    finished,
                    rendered: finished,
                },
                None,
            )
            .percent
        };
        assert_eq!(at(0), 60);
        assert_eq!(at(1), 67);
        assert_eq!(at(5), 95);
    }

    #[test]
    fn test_failed_keeps_percent_and_reports_error() {
        let rendering = ProgressReporter::snapshot(&task_at(Stage::Transcribing), ClipCounts::default(), None);

        let mut failed = task_at(Stage::Failed);
        failed.error = Some("Cancelled".into());
        let snap = ProgressReporter::snapshot(&failed, ClipCounts::default(), Some(&rendering));

        assert_eq!(snap.percent, 20);
        assert_eq!(snap.error.as_deref(), Some("Cancelled"));
        assert_eq!(snap.sequence, rendering.sequence + 1);
        assert!(snap.message.contains("Cancelled"));
    }
}

//! CLI command implementations.

mod config;
mod doctor;
mod list;
mod run;
mod serve;
mod status;

pub use config::run_config;
pub use doctor::run_doctor;
pub use list::{run_list, run_recover};
pub use run::{run_task, RunOverrides};
pub use serve::run_serve;
pub use status::{run_clips, run_status};

use crate::task::TaskId;

fn parse_task_id(input: &str) -> anyhow::Result<TaskId> {
    input
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid task id {:?}: {}", input, e))
}

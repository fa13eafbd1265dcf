//! CLI module for Klipp.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Klipp - turn long videos into short subtitled clips
///
/// Downloads a video, transcribes it, asks a language model for the most
/// interesting moments and renders each one as a vertical clip.
#[derive(Parser, Debug)]
#[command(name = "klipp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "KLIPP_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check system requirements and configuration
    Doctor,

    /// Generate clips from a video and wait for the result
    Run {
        /// Video URL, YouTube ID, or local video file
        source: String,

        /// Who the task belongs to
        #[arg(long, default_value = "cli")]
        owner: String,

        /// Maximum number of clips to render
        #[arg(short = 'n', long)]
        max_clips: Option<usize>,

        /// Shortest acceptable clip, in seconds
        #[arg(long)]
        min_seconds: Option<f64>,

        /// Longest acceptable clip, in seconds
        #[arg(long)]
        max_seconds: Option<f64>,
    },

    /// Show the progress of a task
    Status {
        /// Task ID
        task_id: String,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the rendered clips of a task
    Clips {
        /// Task ID
        task_id: String,

        /// Print the clips as JSON
        #[arg(long)]
        json: bool,
    },

    /// List known tasks
    List {
        /// Maximum number of tasks to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Mark unfinished tasks left behind by a previous process as interrupted
    Recover,

    /// Start HTTP API server for submitting and polling tasks
    Serve {
        /// Host to bind to (defaults to server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (defaults to server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Write the current configuration to the config file
    Init,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}

//! `klipp doctor`: walk the pipeline stage by stage and report what would
//! stop a task from getting through it.

use crate::cli::{preflight, Output};
use crate::config::{LlmProvider, Settings};
use crate::render::TransitionLibrary;
use crate::store;
use console::style;

/// Outcome of one requirement.
#[derive(Debug, PartialEq)]
enum Verdict {
    Ready(String),
    /// Works, but the user should know.
    Degraded(String),
    /// Tasks will fail at this stage.
    Blocked(String),
}

/// A requirement of one pipeline stage.
#[derive(Debug)]
struct Requirement {
    stage: &'static str,
    name: String,
    verdict: Verdict,
}

impl Requirement {
    fn new(stage: &'static str, name: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            stage,
            name: name.into(),
            verdict,
        }
    }

    fn from_result(
        stage: &'static str,
        name: impl Into<String>,
        result: crate::Result<String>,
    ) -> Self {
        let verdict = match result {
            Ok(detail) => Verdict::Ready(detail),
            Err(e) => Verdict::Blocked(e.to_string()),
        };
        Self::new(stage, name, verdict)
    }

    fn print(&self) {
        let (mark, detail) = match &self.verdict {
            Verdict::Ready(d) => (style("ok").green(), d),
            Verdict::Degraded(d) => (style("!!").yellow(), d),
            Verdict::Blocked(d) => (style("xx").red(), d),
        };
        println!("  [{}] {:<14} {}", mark, self.name, style(detail).dim());
    }
}

pub async fn run_doctor(settings: &Settings) -> anyhow::Result<()> {
    Output::header("Klipp Doctor");

    let requirements = gather(settings).await;

    let mut stage = "";
    for req in &requirements {
        if req.stage != stage {
            stage = req.stage;
            println!("\n{}", style(stage).bold());
        }
        req.print();
    }
    println!();

    let blocked = count(&requirements, |v| matches!(v, Verdict::Blocked(_)));
    let degraded = count(&requirements, |v| matches!(v, Verdict::Degraded(_)));
    if blocked > 0 {
        anyhow::bail!("{} requirement(s) would make tasks fail", blocked);
    }
    if degraded > 0 {
        Output::warning(&format!("Ready, with {} note(s) above", degraded));
    } else {
        Output::success("Ready to clip");
    }
    Ok(())
}

async fn gather(settings: &Settings) -> Vec<Requirement> {
    let mut out = Vec::new();
    let tool = |name: &str| preflight::check_tool(name).map(|()| "found on PATH".to_string());

    let download = &settings.download;
    out.push(Requirement::from_result("Download", "yt-dlp", tool("yt-dlp")));
    out.push(Requirement::from_result("Download", "ffprobe", tool("ffprobe")));
    out.push(Requirement::new(
        "Download",
        "source length",
        Verdict::Ready(format!(
            "{:.0}s to {:.0}s accepted",
            download.min_source_seconds, download.max_source_seconds
        )),
    ));

    out.push(Requirement::from_result(
        "Transcription",
        "Whisper key",
        preflight::check_api_key().map(|()| "OPENAI_API_KEY is set".to_string()),
    ));
    out.push(Requirement::new(
        "Transcription",
        "cache",
        if settings.transcription.cache {
            Verdict::Ready(format!("{}", settings.temp_dir().join("transcripts").display()))
        } else {
            Verdict::Degraded("disabled, every run calls Whisper".into())
        },
    ));

    let llm = &settings.llm;
    let backend = match llm.provider {
        LlmProvider::Ollama => preflight::check_ollama(settings)
            .await
            .map(|()| format!("{} at {}", llm.model, llm.base_url)),
        LlmProvider::OpenAi => preflight::check_api_key().map(|()| llm.model.clone()),
    };
    out.push(Requirement::from_result("Selection", llm.provider.to_string(), backend));

    out.push(Requirement::from_result("Render", "ffmpeg", tool("ffmpeg")));
    out.push(transitions(settings));
    out.push(Requirement::new(
        "Render",
        "output",
        Verdict::Ready(format!("{}", settings.output_dir().display())),
    ));

    out.push(Requirement::from_result(
        "Store",
        settings.store.provider.clone(),
        open_store(settings).await,
    ));

    out.push(Requirement::from_result(
        "Settings",
        "validation",
        settings.validate().map(|()| {
            format!(
                "clips of {}-{}s, up to {} per task",
                settings.selection.min_segment_seconds,
                settings.selection.max_segment_seconds,
                settings.selection.max_clips_per_task
            )
        }),
    ));
    let config_path = Settings::default_config_path();
    out.push(Requirement::new(
        "Settings",
        "config file",
        if config_path.exists() {
            Verdict::Ready(format!("{}", config_path.display()))
        } else {
            Verdict::Degraded("none, using defaults (klipp config init)".into())
        },
    ));

    out
}

fn transitions(settings: &Settings) -> Requirement {
    let verdict = match settings.transitions_dir() {
        None => Verdict::Ready("none configured".into()),
        Some(dir) => match TransitionLibrary::load(&dir, settings.render.transition_max_seconds) {
            Ok(library) if !library.is_empty() => {
                Verdict::Ready(format!("{} asset(s) in {}", library.len(), dir.display()))
            }
            Ok(_) => Verdict::Degraded(format!("no .mp4 files in {}", dir.display())),
            Err(e) => Verdict::Blocked(e.to_string()),
        },
    };
    Requirement::new("Render", "transitions", verdict)
}

async fn open_store(settings: &Settings) -> crate::Result<String> {
    let store = store::open(settings)?;
    let tasks = store.list_tasks().await?;
    let unfinished = tasks.iter().filter(|t| !t.is_terminal()).count();
    Ok(format!("{} task(s), {} unfinished", tasks.len(), unfinished))
}

fn count(requirements: &[Requirement], pred: impl Fn(&Verdict) -> bool) -> usize {
    requirements.iter().filter(|r| pred(&r.verdict)).count()
}

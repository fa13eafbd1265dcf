//! Pre-flight checks before expensive operations.
//!
//! Validates that required tools and configuration are available
//! before starting a task that would otherwise fail midway.

use crate::config::{LlmProvider, Settings};
use crate::error::{KlippError, Result};
use crate::llm::OllamaModel;
use std::process::Command;
use std::time::Duration;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Running a task needs the media tools, the transcription key and a
    /// reachable language model.
    Run,
    /// Reading tasks back needs nothing external.
    Inspect,
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub async fn check(operation: Operation, settings: &Settings) -> Result<()> {
    match operation {
        Operation::Run => {
            check_api_key()?;
            check_tool("yt-dlp")?;
            check_tool("ffmpeg")?;
            check_tool("ffprobe")?;
            if settings.llm.provider == LlmProvider::Ollama {
                check_ollama(settings).await?;
            }
        }
        Operation::Inspect => {}
    }
    Ok(())
}

/// Check if OpenAI API key is configured.
pub(crate) fn check_api_key() -> Result<()> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(()),
        Ok(_) => Err(KlippError::Config(
            "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
        Err(_) => Err(KlippError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}

/// Check if an external tool is available.
pub(crate) fn check_tool(name: &str) -> Result<()> {
    // ffmpeg/ffprobe use -version (single dash), others use --version
    let version_arg = match name {
        "ffmpeg" | "ffprobe" => "-version",
        _ => "--version",
    };
    match Command::new(name).arg(version_arg).output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(KlippError::ToolNotFound(format!(
            "{} is installed but not working correctly",
            name
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(KlippError::ToolNotFound(name.to_string()))
        }
        Err(e) => Err(KlippError::ToolNotFound(format!("{}: {}", name, e))),
    }
}

/// Check that the Ollama server answers and has the configured model.
pub(crate) async fn check_ollama(settings: &Settings) -> Result<()> {
    let model = OllamaModel::new(
        &settings.llm.base_url,
        &settings.llm.model,
        settings.llm.temperature,
    )?;

    let response = reqwest::Client::new()
        .get(model.tags_url())
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| {
            KlippError::Config(format!(
                "Ollama is not reachable at {}: {}. Start it with: ollama serve",
                settings.llm.base_url, e
            ))
        })?;

    let tags: serde_json::Value = response.json().await?;
    let installed = tags["models"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m["name"].as_str())
                .any(|name| name == settings.llm.model)
        })
        .unwrap_or(false);

    if !installed {
        return Err(KlippError::Config(format!(
            "Ollama model {} is not installed. Pull it with: ollama pull {}",
            settings.llm.model, settings.llm.model
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_inspect_no_requirements() {
        assert!(check(Operation::Inspect, &Settings::default()).await.is_ok());
    }

    #[test]
    fn test_missing_tool() {
        let err = check_tool("klipp-no-such-tool").unwrap_err();
        assert!(matches!(err, KlippError::ToolNotFound(_)));
    }
}

//! Language model backends used for segment selection.

mod ollama;
mod openai;

pub use ollama::OllamaModel;
pub use openai::OpenAiModel;

use crate::config::{LlmProvider, LlmSettings};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A prompt split into its system instructions and the user turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    /// Both parts joined, for backends without a separate system role.
    pub fn combined(&self) -> String {
        if self.system.trim().is_empty() {
            self.user.clone()
        } else {
            format!("{}\n\n{}", self.system.trim_end(), self.user)
        }
    }
}

/// Trait for text-completion backends.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete the prompt and return the raw reply text.
    ///
    /// Implementations fail with `InferenceTimeout` when `timeout` elapses
    /// and `InferenceFailed` for anything else.
    async fn complete(&self, prompt: &Prompt, timeout: Duration) -> Result<String>;

    /// Model identifier, for logs.
    fn name(&self) -> &str;
}

/// Build the configured backend.
pub fn from_settings(settings: &LlmSettings) -> Result<Arc<dyn LanguageModel>> {
    let model: Arc<dyn LanguageModel> = match settings.provider {
        LlmProvider::Ollama => Arc::new(OllamaModel::new(
            &settings.base_url,
            &settings.model,
            settings.temperature,
        )?),
        LlmProvider::OpenAi => Arc::new(OpenAiModel::new(
            &settings.base_url,
            &settings.model,
            settings.temperature,
        )?),
    };
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_combined() {
        assert_eq!(Prompt::new("sys", "user").combined(), "sys\n\nuser");
        assert_eq!(Prompt::new("  ", "user").combined(), "user");
    }
}

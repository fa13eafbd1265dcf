//! OpenAI chat-completions backend.

use super::{LanguageModel, Prompt};
use crate::error::{KlippError, Result};
use crate::openai::create_client_for;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

/// HTTP-level ceiling; the per-call timeout passed to `complete` is enforced on top.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(7200);

/// A chat model behind the OpenAI API, or any compatible server.
pub struct OpenAiModel {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiModel {
    pub fn new(base_url: &str, model: &str, temperature: f32) -> Result<Self> {
        // The Ollama default URL is meaningless here.
        let base_url = Some(base_url.trim()).filter(|u| !u.contains(":11434"));
        Ok(Self {
            client: create_client_for(CLIENT_TIMEOUT, base_url)?,
            model: model.to_string(),
            temperature,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, prompt: &Prompt, timeout: Duration) -> Result<String> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);
        if !prompt.system.trim().is_empty() {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(prompt.system.clone())
                    .build()
                    .map_err(|e| KlippError::InferenceFailed(e.to_string()))?
                    .into(),
            );
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.user.clone())
                .build()
                .map_err(|e| KlippError::InferenceFailed(e.to_string()))?
                .into(),
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .build()
            .map_err(|e| KlippError::InferenceFailed(e.to_string()))?;

        let response = tokio::time::timeout(timeout, self.client.chat().create(request))
            .await
            .map_err(|_| KlippError::InferenceTimeout(timeout.as_secs()))?
            .map_err(|e| KlippError::InferenceFailed(format!("OpenAI request failed: {}", e)))?;

        let answer = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| KlippError::InferenceFailed("Empty response from LLM".to_string()))?;

        debug!("Received {} characters", answer.len());
        Ok(answer)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

//! Ollama backend talking to `/api/generate`.

use super::{LanguageModel, Prompt};
use crate::error::{KlippError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// A model served by a local Ollama instance.
pub struct OllamaModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaModel {
    pub fn new(base_url: &str, model: &str, temperature: f32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| KlippError::InferenceFailed(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = if base_url.trim().is_empty() {
            DEFAULT_BASE_URL
        } else {
            base_url.trim()
        };

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    /// URL of the model listing, used by the health check.
    pub fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, prompt: &Prompt, timeout: Duration) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: prompt.combined(),
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                top_p: 0.9,
            },
        };

        debug!("Sending {} prompt characters to Ollama", body.prompt.len());

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                KlippError::InferenceTimeout(timeout.as_secs())
            } else {
                KlippError::InferenceFailed(format!("Ollama request failed: {}", e))
            }
        };

        let response = self
            .client
            .post(self.generate_url())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status();
        let parsed: GenerateResponse = response.json().await.map_err(map_err)?;

        if let Some(error) = parsed.error {
            return Err(KlippError::InferenceFailed(format!("Ollama error: {}", error)));
        }
        if !status.is_success() {
            return Err(KlippError::InferenceFailed(format!(
                "Ollama returned HTTP {}",
                status
            )));
        }

        debug!("Received {} characters from Ollama", parsed.response.len());
        Ok(parsed.response)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

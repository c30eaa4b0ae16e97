//! Generative backend abstraction and the Ollama implementation.
//!
//! The pipeline talks to a [`GenerativeBackend`] in two ways: a cheap
//! liveness [`probe`](GenerativeBackend::probe) before any expensive build
//! work, and [`generate`](GenerativeBackend::generate) with one fully
//! assembled prompt per question.
//!
//! [`OllamaBackend`] speaks the Ollama HTTP API:
//!
//! ```text
//! GET  {base_url}/api/tags                               → 200 when alive
//! POST {base_url}/api/generate
//!      { model, prompt, stream: false,
//!        options: { temperature, num_ctx } }            → { response }
//! ```
//!
//! Connection failures and timeouts become
//! [`PipelineError::BackendUnavailable`]; non-success statuses and bodies
//! without a `response` string become [`PipelineError::Generation`].
//! Nothing here retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{PipelineError, Result};

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    fn model_name(&self) -> &str;

    /// Succeeds when the backend is reachable and answering.
    async fn probe(&self) -> Result<()>;

    /// Generate a completion for `prompt`, returning the raw text.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_ctx: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaBackend {
    base_url: String,
    model: String,
    temperature: f32,
    num_ctx: u32,
    probe_timeout: Duration,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::config(format!("http client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            num_ctx: config.num_ctx,
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            client,
        })
    }
}

#[async_trait]
impl GenerativeBackend for OllamaBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn probe(&self) -> Result<()> {
        let endpoint = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| PipelineError::unavailable(&endpoint, e))?;

        if !response.status().is_success() {
            return Err(PipelineError::unavailable(
                &endpoint,
                format!("status {}", response.status()),
            ));
        }
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let endpoint = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_ctx: self.num_ctx,
            },
        };

        let response = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::unavailable(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "generation request rejected");
            return Err(PipelineError::generation(
                format!("backend returned {}: {}", status, body_text),
                Some(status.as_u16()),
            ));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            PipelineError::generation(format!("unparseable backend response: {}", e), None)
        })?;
        Ok(parsed.response)
    }
}

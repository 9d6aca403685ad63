//! Cloudflare Workers AI client for transcription and categorization.
//!
//! Both models go through the account-scoped `ai/run` endpoint. Each call
//! retries transient failures up to the configured budget and then resolves
//! to `None`; the pipeline records that as a terminal failure for the unit.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Categorizer, Transcriber};

const API_BASE_URL: &str = "https://api.cloudflare.com/client/v4/accounts";
const WHISPER_MODEL: &str = "@cf/openai/whisper-large-v3-turbo";
const LLAMA_MODEL: &str = "@cf/meta/llama-3-8b-instruct";

/// Connection and retry settings for Workers AI.
#[derive(Debug, Clone)]
pub struct WorkersAiConfig {
    pub account_id: String,
    pub api_token: String,
    /// Categories offered to the model in the system prompt.
    pub categories: Vec<String>,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl WorkersAiConfig {
    pub fn new(account_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            api_token: api_token.into(),
            categories: vec!["music".to_string(), "science".to_string()],
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// HTTP client implementing both network-bound collaborators.
pub struct WorkersAiClient {
    client: reqwest::Client,
    config: WorkersAiConfig,
}

/// Response envelope shared by every `ai/run` model.
#[derive(Debug, Deserialize)]
struct RunResponse {
    #[serde(default)]
    success: bool,
    result: Option<RunResult>,
}

#[derive(Debug, Deserialize)]
struct RunResult {
    /// Whisper transcription text.
    text: Option<String>,
    /// Llama chat response.
    response: Option<String>,
}

impl WorkersAiClient {
    pub fn new(config: WorkersAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn run_url(&self, model: &str) -> String {
        format!("{API_BASE_URL}/{}/ai/run/{model}", self.config.account_id)
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a friendly assistant that helps categorise conversations and \
             summarises if there is any of these categories in the text: {:?}",
            self.config.categories
        )
    }

    /// POST `payload` to `model`, retrying failures with a fixed delay.
    /// Resolves to `None` once the budget is exhausted.
    async fn run_model(&self, model: &str, payload: &Value) -> Option<RunResponse> {
        for attempt in 1..=self.config.max_retries.max(1) {
            match self.try_run(model, payload).await {
                Ok(response) => return Some(response),
                Err(e) => {
                    tracing::warn!(model, attempt, error = %e, "Workers AI call failed");
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        None
    }

    async fn try_run(&self, model: &str, payload: &Value) -> Result<RunResponse> {
        let response = self
            .client
            .post(self.run_url(model))
            .bearer_auth(&self.config.api_token)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Transcriber for WorkersAiClient {
    async fn transcribe(&self, wav: &Path) -> Result<Option<String>> {
        let bytes = tokio::fs::read(wav)
            .await
            .with_context(|| format!("reading {}", wav.display()))?;
        let payload = json!({ "audio": BASE64_STANDARD.encode(&bytes) });

        let Some(response) = self.run_model(WHISPER_MODEL, &payload).await else {
            return Ok(None);
        };
        if !response.success {
            tracing::warn!(wav = %wav.display(), "Whisper response unsuccessful");
            return Ok(None);
        }
        Ok(response
            .result
            .and_then(|r| r.text)
            .map(|t| t.trim().to_string()))
    }
}

#[async_trait]
impl Categorizer for WorkersAiClient {
    async fn categorize(&self, prompt: &str) -> Result<Option<String>> {
        let payload = json!({
            "messages": [
                { "role": "system", "content": self.system_prompt() },
                { "role": "user", "content": prompt },
            ]
        });

        let Some(response) = self.run_model(LLAMA_MODEL, &payload).await else {
            return Ok(None);
        };
        if !response.success {
            tracing::warn!("Llama response unsuccessful");
            return Ok(None);
        }
        Ok(response.result.and_then(|r| r.response))
    }
}

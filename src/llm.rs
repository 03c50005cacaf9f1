//! Hosted text-generation capability.
//!
//! [`Generator`] is the raw `complete(prompt) -> text` seam used by the
//! intent classifier, the retrieval engine and the refinement pass.
//! [`ChatCompletionClient`] implements it against any OpenAI-compatible
//! `POST {api_base}/chat/completions` endpoint (Together by default).
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ...)
//! - Network errors → retry
//! - Other 4xx → fail immediately; a body mentioning the context length
//!   becomes [`SqlChatError::ContextOverflow`], anything else
//!   [`SqlChatError::Provider`]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::SqlChatError;

/// A text-completion backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier, for logs and `/health`.
    fn model_name(&self) -> &str;

    /// Complete `prompt` and return the model's text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat-completions client.
pub struct ChatCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl ChatCompletionClient {
    pub fn new(
        api_base: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        config: &LlmConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
            temperature: config.temperature,
            max_tokens,
            max_retries: config.max_retries,
        })
    }

    fn with_model(config: &LlmConfig, model: String, max_tokens: u32) -> Result<Self> {
        let api_key = config.api_key().ok_or_else(|| {
            SqlChatError::MissingCredentials(format!("{} not set", config.api_key_env))
        })?;
        Self::new(&config.api_base, api_key, model, max_tokens, config)
    }

    /// Main generation model (`llm.max_tokens`).
    pub fn generator(config: &LlmConfig) -> Result<Self> {
        Self::with_model(config, config.resolved_model(), config.max_tokens)
    }

    /// One-word intent classifier (`llm.classifier_max_tokens`).
    pub fn classifier(config: &LlmConfig) -> Result<Self> {
        Self::with_model(config, config.resolved_model(), config.classifier_max_tokens)
    }

    /// Validation/refinement model (`llm.validator_model`, default: main model).
    pub fn validator(config: &LlmConfig) -> Result<Self> {
        Self::with_model(config, config.resolved_validator_model(), config.max_tokens)
    }
}

#[async_trait]
impl Generator for ChatCompletionClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying completion");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_completion_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Completion API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if mentions_context_limit(&body_text) {
                        return Err(SqlChatError::ContextOverflow(body_text).into());
                    }
                    return Err(SqlChatError::Provider {
                        status: status.as_u16(),
                        message: body_text,
                    }
                    .into());
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "Completion request to {} failed: {}",
                        self.endpoint,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Completion failed after retries")))
    }
}

fn mentions_context_limit(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("context length")
        || lower.contains("context size")
        || lower.contains("maximum context")
        || lower.contains("context window")
}

/// Extract `choices[0].message.content` (or legacy `choices[0].text`).
fn parse_completion_response(json: &serde_json::Value) -> Result<String> {
    let choice = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing choices"))?;

    let text = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| choice.get("text"))
        .and_then(|t| t.as_str());

    match text {
        Some(t) => Ok(t.trim().to_string()),
        None => bail!("Invalid completion response: missing message content"),
    }
}

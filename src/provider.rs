//! Generative-model provider abstraction and the Gemini implementation.
//!
//! Defines the [`GenerativeProvider`] trait and [`GeminiProvider`], which calls
//! the Google Generative Language `generateContent` endpoint with retry and
//! backoff.
//!
//! Providers are constructed once and injected into the
//! [`ExplanationGenerator`](crate::generator::ExplanationGenerator); tests
//! substitute their own implementation instead of touching the environment.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GeneratorConfig;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// A single generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// When set, the provider must answer with JSON matching this schema.
    pub response_schema: Option<Value>,
}

/// Raw provider answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub text: String,
    /// Total token count from usage metadata, when reported.
    pub total_tokens: Option<u32>,
}

#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-2.5-flash"`).
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderResponse>;
}

/// Provider backed by the Gemini REST API.
pub struct GeminiProvider {
    model: String,
    api_key: String,
    base_url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(config: &GeneratorConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            max_retries: config.max_retries,
            client,
        })
    }

    fn request_body(request: &GenerationRequest) -> Value {
        let mut generation_config = json!({
            "temperature": request.temperature,
            "maxOutputTokens": request.max_output_tokens,
        });
        if let Some(schema) = &request.response_schema {
            generation_config["responseMimeType"] = json!("application/json");
            generation_config["responseSchema"] = schema.clone();
        }
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": generation_config,
        })
    }
}

#[async_trait]
impl GenerativeProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderResponse> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = Self::request_body(request);

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        debug!(model = %self.model, attempt, "gemini call succeeded");
                        return parse_gemini_response(&json);
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(%status, attempt, "gemini call failed, will retry");
                        last_err = Some(anyhow::anyhow!("Gemini API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429): don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Gemini API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "gemini request error, will retry");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Generation failed after retries")))
    }
}

/// Extracts the concatenated candidate text and usage metadata.
pub fn parse_gemini_response(json: &Value) -> Result<ProviderResponse> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(|r| r.as_str())
                .unwrap_or("missing candidates");
            anyhow::anyhow!("Invalid Gemini response: {}", reason)
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.trim().is_empty() {
        bail!("AI analysis returned an empty response.");
    }

    let total_tokens = json
        .pointer("/usageMetadata/totalTokenCount")
        .and_then(|t| t.as_u64())
        .and_then(|t| u32::try_from(t).ok());

    Ok(ProviderResponse { text, total_tokens })
}

/// Builds the configured provider.
///
/// Returns `Ok(None)` when the provider is disabled or its credential is
/// absent; the generator then reports a configuration error on every call
/// without attempting I/O.
pub fn create_provider(config: &GeneratorConfig) -> Result<Option<Arc<dyn GenerativeProvider>>> {
    if !config.is_enabled() {
        return Ok(None);
    }
    match config.provider.as_str() {
        "gemini" => match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => {
                let provider: Arc<dyn GenerativeProvider> =
                    Arc::new(GeminiProvider::new(config, key)?);
                Ok(Some(provider))
            }
            _ => {
                warn!(
                    "{} not set; explanation generation is unavailable",
                    config.api_key_env
                );
                Ok(None)
            }
        },
        other => bail!("Unknown generator provider: {}", other),
    }
}

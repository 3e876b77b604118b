//! Explanation generation on top of a [`GenerativeProvider`].
//!
//! Two request modes share one result shape ([`ExplanationResult`]):
//!
//! - **Constrained**: the provider is given a response schema. The answer
//!   must parse; a parse failure is a [`GenerationError::InvalidResponse`].
//! - **Best-effort**: JSON is only requested in the prompt. The answer is
//!   recovered with [`extract_json_object`], and anything unrecoverable
//!   (including provider failures) becomes [`ExplanationResult::fallback`].
//!
//! In both modes every optional field is defaulted so nothing downstream
//! ever sees an absent value.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

use crate::config::{GenerationMode, GeneratorConfig};
use crate::extract::{extract_json_object, Extracted};
use crate::models::{
    default_improvements, default_key_points, Explanation, ExplanationDoc, ExplanationResult,
    DEFAULT_COMPLEXITY, DEFAULT_TOKENS_USED, FALLBACK_EXPLANATION,
};
use crate::provider::{GenerationRequest, GenerativeProvider, ProviderResponse};

#[derive(Debug, Error)]
pub enum GenerationError {
    /// No provider credential is available; nothing was sent.
    #[error("AI provider is not configured: {0}")]
    Configuration(String),
    /// Network or provider failure, carrying the upstream message.
    #[error("Failed to generate AI explanation: {0}")]
    Provider(String),
    /// The provider ignored the response schema.
    #[error("AI returned an invalid JSON structure despite JSON mode: {0}")]
    InvalidResponse(String),
}

/// Response schema sent to the provider in constrained mode.
pub fn explanation_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "commentedCode": {
                "type": "STRING",
                "description": "The original code with concise, helpful inline comments added."
            },
            "explanationDoc": {
                "type": "OBJECT",
                "description": "A comprehensive, documentation-style explanation of the code.",
                "properties": {
                    "overview": {
                        "type": "STRING",
                        "description": "A high-level summary. Be concise, 1-2 sentences MAX."
                    },
                    "logicFlow": {
                        "type": "STRING",
                        "description": "A bulleted list of the step-by-step logic. Be brief."
                    },
                    "functionBreakdown": {
                        "type": "STRING",
                        "description": "A breakdown of ONLY the 2-3 most important functions/classes. Explain parameters and return value. Be concise."
                    },
                    "usageExample": {
                        "type": "STRING",
                        "description": "A single, brief code snippet (under 10 lines) showing how to use this code."
                    }
                },
                "required": ["overview", "logicFlow", "functionBreakdown", "usageExample"]
            },
            "keyPoints": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "A list of exactly 3 bullet-point takeaways about the code."
            },
            "complexity": {
                "type": "STRING",
                "description": "A brief analysis of Time and Space Complexity (e.g., 'Time: O(n), Space: O(1)')"
            },
            "improvements": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "A list of the top 1-2 actionable suggestions for improving the code."
            }
        },
        "required": ["commentedCode", "explanationDoc", "keyPoints", "complexity", "improvements"]
    })
}

fn constrained_prompt(code: &str, language: &str, file_name: &str) -> String {
    format!(
        r#"Analyze the following {language} code from the file "{file_name}".
Provide a comprehensive analysis based on the defined JSON schema.
The 'commentedCode' must be the full original code with added comments.
The 'explanationDoc' sections must be detailed and high-quality.
The 'usageExample' must be a valid, runnable code snippet.

Code:
---
{code}
---
"#
    )
}

fn best_effort_prompt(code: &str, language: &str, file_name: &str) -> String {
    format!(
        r#"Analyze the following {language} code from the file "{file_name}".
Respond with a single JSON object and nothing else, using exactly these keys:
  "commentedCode": the full original code with concise inline comments added,
  "explanation": a clear explanation of what the code does and how,
  "keyPoints": an array of 3 short takeaways,
  "complexity": time and space complexity, e.g. "Time: O(n), Space: O(1)",
  "improvements": an array of 1-2 actionable suggestions.

Code:
---
{code}
---
"#
    )
}

/// Wire shape of a constrained-mode answer. Missing fields are defaulted later.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConstrainedAnswer {
    commented_code: Option<String>,
    explanation_doc: Option<ExplanationDoc>,
    key_points: Option<Vec<String>>,
    complexity: Option<String>,
    improvements: Option<Vec<String>>,
}

pub struct ExplanationGenerator {
    provider: Option<Arc<dyn GenerativeProvider>>,
    mode: GenerationMode,
    temperature: f32,
    max_output_tokens: u32,
    credential_hint: String,
}

impl ExplanationGenerator {
    pub fn new(provider: Option<Arc<dyn GenerativeProvider>>, config: &GeneratorConfig) -> Self {
        Self {
            provider,
            mode: config.mode,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            credential_hint: format!("set {} to enable explanations", config.api_key_env),
        }
    }

    pub fn model_name(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.model_name())
    }

    pub async fn generate(
        &self,
        code: &str,
        language: &str,
        file_name: &str,
    ) -> Result<ExplanationResult, GenerationError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| GenerationError::Configuration(self.credential_hint.clone()))?;

        match self.mode {
            GenerationMode::Constrained => {
                let request = GenerationRequest {
                    prompt: constrained_prompt(code, language, file_name),
                    temperature: self.temperature,
                    max_output_tokens: self.max_output_tokens,
                    response_schema: Some(explanation_schema()),
                };
                let response = provider.generate(&request).await.map_err(|e| {
                    error!(error = %e, "constrained generation failed");
                    GenerationError::Provider(e.to_string())
                })?;
                normalize_constrained(code, &response)
            }
            GenerationMode::BestEffort => {
                let request = GenerationRequest {
                    prompt: best_effort_prompt(code, language, file_name),
                    temperature: self.temperature,
                    max_output_tokens: self.max_output_tokens,
                    response_schema: None,
                };
                match provider.generate(&request).await {
                    Ok(response) => Ok(normalize_best_effort(code, &response)),
                    Err(e) => {
                        warn!(error = %e, "best-effort generation failed, using fallback");
                        Ok(ExplanationResult::fallback(code, DEFAULT_TOKENS_USED))
                    }
                }
            }
        }
    }
}

fn tokens_of(response: &ProviderResponse) -> u32 {
    response.total_tokens.unwrap_or(DEFAULT_TOKENS_USED)
}

fn non_empty_string(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn non_empty_list(value: Option<Vec<String>>) -> Option<Vec<String>> {
    value.filter(|v| !v.is_empty())
}

/// Strictly parses a constrained-mode answer and fills in defaults.
pub fn normalize_constrained(
    code: &str,
    response: &ProviderResponse,
) -> Result<ExplanationResult, GenerationError> {
    let answer: ConstrainedAnswer = serde_json::from_str(response.text.trim()).map_err(|e| {
        error!(error = %e, "constrained answer did not match the schema");
        GenerationError::InvalidResponse(e.to_string())
    })?;

    Ok(ExplanationResult {
        commented_code: non_empty_string(answer.commented_code).unwrap_or_else(|| code.to_string()),
        explanation: Explanation::Doc(answer.explanation_doc.unwrap_or_default()),
        key_points: non_empty_list(answer.key_points).unwrap_or_else(default_key_points),
        complexity: non_empty_string(answer.complexity)
            .unwrap_or_else(|| DEFAULT_COMPLEXITY.to_string()),
        improvements: non_empty_list(answer.improvements).unwrap_or_else(default_improvements),
        tokens_used: tokens_of(response),
    })
}

/// Recovers a best-effort answer; never fails.
pub fn normalize_best_effort(code: &str, response: &ProviderResponse) -> ExplanationResult {
    let tokens = tokens_of(response);
    let object = match extract_json_object(&response.text) {
        Extracted::Whole(object) | Extracted::Embedded { object, .. } => object,
        Extracted::Unparseable(raw) => {
            warn!(len = raw.len(), "could not recover JSON from model output, using fallback");
            return ExplanationResult::fallback(code, tokens);
        }
    };

    let commented_code = match string_field(&object, "commentedCode") {
        Some(inner) if looks_like_embedded_json(&inner) => unwrap_echoed_code(&inner, code),
        Some(inner) => inner,
        None => code.to_string(),
    };

    let explanation = string_field(&object, "explanation")
        .or_else(|| string_field(&object, "explanationText"))
        .unwrap_or_else(|| FALLBACK_EXPLANATION.to_string());

    ExplanationResult {
        commented_code,
        explanation: Explanation::Text(explanation),
        key_points: list_field(&object, "keyPoints").unwrap_or_else(default_key_points),
        complexity: string_field(&object, "complexity")
            .unwrap_or_else(|| DEFAULT_COMPLEXITY.to_string()),
        improvements: list_field(&object, "improvements").unwrap_or_else(default_improvements),
        tokens_used: tokens,
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    non_empty_string(object.get(key).and_then(|v| v.as_str()).map(str::to_string))
}

fn list_field(object: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    let items = object.get(key)?.as_array()?;
    let list: Vec<String> = items
        .iter()
        .filter_map(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .collect();
    non_empty_list(Some(list))
}

/// True when the model echoed a JSON answer inside the code field.
fn looks_like_embedded_json(value: &str) -> bool {
    value.trim_start().starts_with('{') || value.contains("\"commentedCode\"")
}

/// Pulls the real code out of an echoed answer, or returns the original source.
fn unwrap_echoed_code(value: &str, original: &str) -> String {
    extract_json_object(value)
        .into_object()
        .and_then(|inner| string_field(&inner, "commentedCode"))
        .filter(|inner| !looks_like_embedded_json(inner))
        .unwrap_or_else(|| original.to_string())
}

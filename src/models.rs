//! Core data models used throughout the explainer.
//!
//! These types represent the submissions, explanation results, and persisted
//! records that flow through the explanation pipeline.

use serde::{Deserialize, Serialize};

/// Placeholder token count used when the provider reports no usage metadata.
pub const DEFAULT_TOKENS_USED: u32 = 150;
pub const DEFAULT_KEY_POINT: &str = "Code analyzed";
pub const DEFAULT_COMPLEXITY: &str = "Not specified";
pub const DEFAULT_IMPROVEMENT: &str = "Review code structure";
pub const DEFAULT_OVERVIEW: &str = "No overview generated.";
pub const FALLBACK_EXPLANATION: &str =
    "Unable to parse a structured explanation from the AI response.";

/// Normalized input ready for explanation generation. Never persisted itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSubmission {
    pub code: String,
    pub language: String,
    pub file_name: String,
    pub size: usize,
    /// Lowercased extension including the dot; only set for uploads.
    pub extension: Option<String>,
}

/// Documentation-style explanation produced in constrained mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExplanationDoc {
    pub overview: String,
    pub logic_flow: String,
    pub function_breakdown: String,
    pub usage_example: String,
}

impl Default for ExplanationDoc {
    fn default() -> Self {
        Self {
            overview: DEFAULT_OVERVIEW.to_string(),
            logic_flow: String::new(),
            function_breakdown: String::new(),
            usage_example: String::new(),
        }
    }
}

/// The two mutually exclusive explanation shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Explanation {
    /// Free-form text (best-effort mode).
    Text(String),
    /// Structured documentation (constrained mode).
    Doc(ExplanationDoc),
}

impl Explanation {
    pub fn kind(&self) -> &'static str {
        match self {
            Explanation::Text(_) => "text",
            Explanation::Doc(_) => "doc",
        }
    }
}

/// Normalized output of the generation step. Every field is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationResult {
    pub commented_code: String,
    pub explanation: Explanation,
    pub key_points: Vec<String>,
    pub complexity: String,
    pub improvements: Vec<String>,
    pub tokens_used: u32,
}

impl ExplanationResult {
    /// Deterministic result used when best-effort output cannot be recovered.
    pub fn fallback(code: &str, tokens_used: u32) -> Self {
        Self {
            commented_code: code.to_string(),
            explanation: Explanation::Text(FALLBACK_EXPLANATION.to_string()),
            key_points: default_key_points(),
            complexity: DEFAULT_COMPLEXITY.to_string(),
            improvements: default_improvements(),
            tokens_used,
        }
    }
}

pub fn default_key_points() -> Vec<String> {
    vec![DEFAULT_KEY_POINT.to_string()]
}

pub fn default_improvements() -> Vec<String> {
    vec![DEFAULT_IMPROVEMENT.to_string()]
}

/// A user's project grouping explanations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A persisted explanation joined with the owner of its project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationRecord {
    pub id: String,
    pub project_id: String,
    pub owner_id: String,
    pub file_name: String,
    pub language: String,
    pub original_code: String,
    pub result: ExplanationResult,
    pub ai_model: String,
    pub created_at: i64,
}

/// Fields written when an explanation is persisted; the project is chosen by the caller.
#[derive(Debug, Clone)]
pub struct NewExplanation {
    pub file_name: String,
    pub language: String,
    pub original_code: String,
    pub result: ExplanationResult,
    pub ai_model: String,
}

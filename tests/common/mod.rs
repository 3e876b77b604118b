//! Shared fixtures: a temp SQLite store and a scripted provider.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use code_explainer::cache::ResultCache;
use code_explainer::config::{Config, GenerationMode, GeneratorConfig};
use code_explainer::explain::Explainer;
use code_explainer::generator::ExplanationGenerator;
use code_explainer::provider::{GenerationRequest, GenerativeProvider, ProviderResponse};
use code_explainer::store::SqliteStore;
use code_explainer::{db, migrate};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Replays a fixed answer (or failure) and records every request it sees.
pub struct ScriptedProvider {
    answer: Result<ProviderResponse, String>,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    pub fn answering(text: &str, total_tokens: Option<u32>) -> Arc<Self> {
        Arc::new(Self {
            answer: Ok(ProviderResponse {
                text: text.to_string(),
                total_tokens,
            }),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::failing_after(message, Duration::ZERO)
    }

    /// Fails only after `delay`, leaving concurrent work time to finish first.
    pub fn failing_after(message: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answer: Err(message.to_string()),
            delay,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl GenerativeProvider for ScriptedProvider {
    fn model_name(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.answer {
            Ok(response) => Ok(response.clone()),
            Err(message) => Err(anyhow::anyhow!("{}", message)),
        }
    }
}

pub fn as_provider(provider: &Arc<ScriptedProvider>) -> Option<Arc<dyn GenerativeProvider>> {
    let provider: Arc<dyn GenerativeProvider> = provider.clone();
    Some(provider)
}

pub const CONSTRAINED_ANSWER: &str = r#"{
    "commentedCode": "// add two numbers\nfunction add(a, b) { return a + b; }",
    "explanationDoc": {
        "overview": "Adds two numbers.",
        "logicFlow": "Returns the sum.",
        "functionBreakdown": "add(a, b)",
        "usageExample": "add(1, 2)"
    },
    "keyPoints": ["Pure function"],
    "complexity": "Time: O(1), Space: O(1)",
    "improvements": ["Validate inputs"]
}"#;

pub struct TestEnv {
    pub _dir: TempDir,
    pub config: Config,
    pub pool: SqlitePool,
}

pub async fn setup_env() -> TestEnv {
    let dir = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.db.path = dir.path().join("data").join("explainer.sqlite");

    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    TestEnv {
        _dir: dir,
        config,
        pool,
    }
}

pub fn explainer_with(
    env: &TestEnv,
    provider: Option<Arc<dyn GenerativeProvider>>,
    mode: GenerationMode,
) -> Explainer {
    let generator_config = GeneratorConfig {
        provider: "gemini".to_string(),
        mode,
        ..GeneratorConfig::default()
    };
    Explainer::new(
        Arc::new(SqliteStore::new(env.pool.clone())),
        Arc::new(ExplanationGenerator::new(provider, &generator_config)),
        ResultCache::in_memory(),
    )
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

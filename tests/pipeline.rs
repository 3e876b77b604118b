//! End-to-end tests for the explanation pipeline over a real SQLite store.
//!
//! The generative provider is replaced by a scripted implementation so the
//! tests never touch the network or the process environment.

mod common;

use async_trait::async_trait;
use code_explainer::cache::ResultCache;
use code_explainer::config::{GenerationMode, GeneratorConfig};
use code_explainer::error::AppError;
use code_explainer::explain::Explainer;
use code_explainer::generator::ExplanationGenerator;
use code_explainer::input::{parse_raw_code_input, parse_uploaded_file, RawCodeInput, UploadedFile};
use code_explainer::models::{
    CodeSubmission, Explanation, ExplanationRecord, NewExplanation, Project, FALLBACK_EXPLANATION,
};
use code_explainer::store::{SqliteStore, Store};
use common::*;
use std::sync::Arc;
use std::time::Duration;

fn submission(code: &str) -> CodeSubmission {
    parse_raw_code_input(RawCodeInput {
        code: Some(code.to_string()),
        language: Some("JavaScript".to_string()),
        file_name: Some("add.js".to_string()),
    })
    .unwrap()
}

// ─── Write path ─────────────────────────────────────────────────────

#[tokio::test]
async fn missing_credential_is_a_configuration_error_and_persists_nothing() {
    let env = setup_env().await;
    let explainer = explainer_with(&env, None, GenerationMode::Constrained);

    let err = explainer
        .create_explanation("alice", submission("function add(a, b) { return a + b; }"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Configuration(_)), "got {:?}", err);
    assert_eq!(count_rows(&env.pool, "projects").await, 0);
    assert_eq!(count_rows(&env.pool, "explanations").await, 0);
}

#[tokio::test]
async fn constrained_answer_is_persisted_under_a_dated_default_project() {
    let env = setup_env().await;
    let provider = ScriptedProvider::answering(CONSTRAINED_ANSWER, Some(321));
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::Constrained);

    let record = explainer
        .create_explanation("alice", submission("function add(a, b) { return a + b; }"), None)
        .await
        .unwrap();

    assert_eq!(provider.calls(), 1);
    let request = provider.last_request().unwrap();
    assert!(request.response_schema.is_some());
    assert!(request.prompt.contains("function add(a, b)"));
    assert!(request.prompt.contains("javascript"));

    assert_eq!(record.owner_id, "alice");
    assert_eq!(record.ai_model, "scripted-model");
    assert_eq!(record.language, "javascript");
    assert_eq!(record.result.tokens_used, 321);
    assert_eq!(record.result.key_points, vec!["Pure function"]);
    match &record.result.explanation {
        Explanation::Doc(doc) => assert_eq!(doc.overview, "Adds two numbers."),
        other => panic!("expected doc explanation, got {:?}", other),
    }

    let projects = explainer.store().list_projects("alice").await.unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].id, record.project_id);
    assert!(projects[0].name.starts_with("Quick Explanations - "));
}

#[tokio::test]
async fn constrained_answer_missing_lists_gets_defaults() {
    let env = setup_env().await;
    let provider = ScriptedProvider::answering(
        r#"{"commentedCode": "// x\nlet x = 1;", "complexity": "O(1)"}"#,
        None,
    );
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::Constrained);

    let record = explainer
        .create_explanation("alice", submission("let x = 1;"), None)
        .await
        .unwrap();

    assert_eq!(record.result.key_points, vec!["Code analyzed"]);
    assert_eq!(record.result.improvements, vec!["Review code structure"]);
    assert_eq!(record.result.tokens_used, 150);
    assert_eq!(record.result.explanation.kind(), "doc");
}

#[tokio::test]
async fn constrained_provider_failure_persists_no_explanation() {
    let env = setup_env().await;
    let provider = ScriptedProvider::failing("upstream returned 503");
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::Constrained);

    let err = explainer
        .create_explanation("alice", submission("let x = 1;"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Generation(_)), "got {:?}", err);
    assert_eq!(count_rows(&env.pool, "explanations").await, 0);
    assert_eq!(count_rows(&env.pool, "projects").await, 0);
}

#[tokio::test]
async fn slow_failing_generation_leaves_no_default_project() {
    let env = setup_env().await;
    let provider = ScriptedProvider::failing_after("upstream timed out", Duration::from_millis(100));
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::Constrained);

    for _ in 0..3 {
        let err = explainer
            .create_explanation("alice", submission("let x = 1;"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Generation(_)), "got {:?}", err);
    }

    assert_eq!(provider.calls(), 3);
    assert_eq!(count_rows(&env.pool, "projects").await, 0);
    assert!(explainer.store().list_projects("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn constrained_non_json_answer_is_a_generation_error() {
    let env = setup_env().await;
    let provider = ScriptedProvider::answering("Sure! Here is the explanation.", None);
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::Constrained);

    let err = explainer
        .create_explanation("alice", submission("let x = 1;"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Generation(_)), "got {:?}", err);
    assert_eq!(count_rows(&env.pool, "explanations").await, 0);
}

#[tokio::test]
async fn best_effort_recovers_prefixed_json() {
    let env = setup_env().await;
    let provider = ScriptedProvider::answering(
        r#"Here's your answer: {"commentedCode": "// one\nlet x = 1;", "explanation": "Binds x.", "keyPoints": ["binding"]} Hope this helps!"#,
        Some(90),
    );
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::BestEffort);

    let record = explainer
        .create_explanation("alice", submission("let x = 1;"), None)
        .await
        .unwrap();

    assert!(provider.last_request().unwrap().response_schema.is_none());
    assert_eq!(record.result.commented_code, "// one\nlet x = 1;");
    assert_eq!(record.result.explanation, Explanation::Text("Binds x.".to_string()));
    assert_eq!(record.result.key_points, vec!["binding"]);
    assert_eq!(record.result.complexity, "Not specified");
    assert_eq!(record.result.tokens_used, 90);

    let stored = explainer.get_explanation("alice", &record.id).await.unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn best_effort_provider_failure_stores_the_fallback() {
    let env = setup_env().await;
    let provider = ScriptedProvider::failing("connection reset");
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::BestEffort);

    let record = explainer
        .create_explanation("alice", submission("let x = 1;"), None)
        .await
        .unwrap();

    assert_eq!(record.result.commented_code, "let x = 1;");
    assert_eq!(
        record.result.explanation,
        Explanation::Text(FALLBACK_EXPLANATION.to_string())
    );
    assert_eq!(record.result.tokens_used, 150);
    assert_eq!(count_rows(&env.pool, "explanations").await, 1);
}

#[tokio::test]
async fn explicit_project_must_belong_to_the_caller() {
    let env = setup_env().await;
    let provider = ScriptedProvider::answering(CONSTRAINED_ANSWER, None);
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::Constrained);

    let bobs = explainer
        .store()
        .create_project("bob", "Bob's work", "private")
        .await
        .unwrap();

    let err = explainer
        .create_explanation("alice", submission("let x = 1;"), Some(bobs.id.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {:?}", err);
    assert_eq!(count_rows(&env.pool, "explanations").await, 0);

    let record = explainer
        .create_explanation("bob", submission("let x = 1;"), Some(bobs.id.clone()))
        .await
        .unwrap();
    assert_eq!(record.project_id, bobs.id);
    assert_eq!(count_rows(&env.pool, "projects").await, 1);
}

#[tokio::test]
async fn uploaded_file_flows_through_with_detected_language() {
    let env = setup_env().await;
    let provider = ScriptedProvider::answering(CONSTRAINED_ANSWER, None);
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::Constrained);

    let upload = UploadedFile {
        file_name: "main.rs".to_string(),
        bytes: b"\n\nfn main() {}\n\n".to_vec(),
    };
    let submission = parse_uploaded_file(Some(&upload)).unwrap();
    let record = explainer
        .create_explanation("alice", submission, None)
        .await
        .unwrap();

    assert_eq!(record.language, "rust");
    assert_eq!(record.file_name, "main.rs");
    assert_eq!(record.original_code, "fn main() {}");
}

// ─── Read path ──────────────────────────────────────────────────────

#[tokio::test]
async fn get_is_served_from_cache_after_first_read() {
    let env = setup_env().await;
    let provider = ScriptedProvider::answering(CONSTRAINED_ANSWER, None);
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::Constrained);

    let created = explainer
        .create_explanation("alice", submission("let x = 1;"), None)
        .await
        .unwrap();

    let first = explainer.get_explanation("alice", &created.id).await.unwrap();
    assert_eq!(first, created);

    // Remove the row behind the cache's back; the cached copy still answers.
    sqlx::query("DELETE FROM explanations WHERE id = ?")
        .bind(&created.id)
        .execute(&env.pool)
        .await
        .unwrap();

    let second = explainer.get_explanation("alice", &created.id).await.unwrap();
    assert_eq!(second, created);
}

#[tokio::test]
async fn cached_record_is_not_served_to_another_user() {
    let env = setup_env().await;
    let provider = ScriptedProvider::answering(CONSTRAINED_ANSWER, None);
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::Constrained);

    let created = explainer
        .create_explanation("alice", submission("let x = 1;"), None)
        .await
        .unwrap();

    // Warm the cache as the owner, then read as someone else.
    explainer.get_explanation("alice", &created.id).await.unwrap();
    let err = explainer
        .get_explanation("mallory", &created.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {:?}", err);
}

#[tokio::test]
async fn uncached_record_is_not_served_to_another_user() {
    let env = setup_env().await;
    let provider = ScriptedProvider::answering(CONSTRAINED_ANSWER, None);
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::Constrained);

    let created = explainer
        .create_explanation("alice", submission("let x = 1;"), None)
        .await
        .unwrap();

    let err = explainer
        .get_explanation("mallory", &created.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {:?}", err);

    // The owner can still read it afterwards.
    assert!(explainer.get_explanation("alice", &created.id).await.is_ok());
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let env = setup_env().await;
    let explainer = explainer_with(&env, None, GenerationMode::Constrained);
    let err = explainer
        .get_explanation("alice", "does-not-exist")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn deleting_a_project_evicts_its_cached_explanations() {
    let env = setup_env().await;
    let provider = ScriptedProvider::answering(CONSTRAINED_ANSWER, None);
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::Constrained);

    let created = explainer
        .create_explanation("alice", submission("let x = 1;"), None)
        .await
        .unwrap();
    explainer.get_explanation("alice", &created.id).await.unwrap();

    explainer
        .delete_project("alice", &created.project_id)
        .await
        .unwrap();

    let err = explainer
        .get_explanation("alice", &created.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(count_rows(&env.pool, "explanations").await, 0);
}

/// Delegates to SQLite but stalls after reading an explanation, widening the
/// window between the store read and the cache fill.
struct SlowReadStore {
    inner: SqliteStore,
    read_delay: Duration,
}

#[async_trait]
impl Store for SlowReadStore {
    async fn create_project(&self, user_id: &str, name: &str, description: &str)
        -> anyhow::Result<Project> {
        self.inner.create_project(user_id, name, description).await
    }

    async fn find_project(&self, user_id: &str, id: &str) -> anyhow::Result<Option<Project>> {
        self.inner.find_project(user_id, id).await
    }

    async fn list_projects(&self, user_id: &str) -> anyhow::Result<Vec<Project>> {
        self.inner.list_projects(user_id).await
    }

    async fn update_project(
        &self,
        user_id: &str,
        id: &str,
        name: &str,
        description: &str,
    ) -> anyhow::Result<Option<Project>> {
        self.inner.update_project(user_id, id, name, description).await
    }

    async fn delete_project(
        &self,
        user_id: &str,
        id: &str,
    ) -> anyhow::Result<Option<Vec<String>>> {
        self.inner.delete_project(user_id, id).await
    }

    async fn insert_explanation(
        &self,
        project_id: &str,
        new: &NewExplanation,
    ) -> anyhow::Result<ExplanationRecord> {
        self.inner.insert_explanation(project_id, new).await
    }

    async fn insert_explanation_in_new_project(
        &self,
        user_id: &str,
        project_name: &str,
        project_description: &str,
        new: &NewExplanation,
    ) -> anyhow::Result<ExplanationRecord> {
        self.inner
            .insert_explanation_in_new_project(user_id, project_name, project_description, new)
            .await
    }

    async fn explanation_exists(&self, id: &str) -> anyhow::Result<bool> {
        self.inner.explanation_exists(id).await
    }

    async fn get_explanation(
        &self,
        id: &str,
        owner: Option<&str>,
    ) -> anyhow::Result<Option<ExplanationRecord>> {
        let record = self.inner.get_explanation(id, owner).await?;
        tokio::time::sleep(self.read_delay).await;
        Ok(record)
    }

    async fn list_explanations(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> anyhow::Result<Vec<ExplanationRecord>> {
        self.inner.list_explanations(user_id, project_id).await
    }
}

#[tokio::test]
async fn read_racing_a_project_delete_does_not_recache_the_record() {
    let env = setup_env().await;
    let provider = ScriptedProvider::answering(CONSTRAINED_ANSWER, None);
    let generator_config = GeneratorConfig {
        provider: "gemini".to_string(),
        ..GeneratorConfig::default()
    };
    let explainer = Explainer::new(
        Arc::new(SlowReadStore {
            inner: SqliteStore::new(env.pool.clone()),
            read_delay: Duration::from_millis(200),
        }),
        Arc::new(ExplanationGenerator::new(as_provider(&provider), &generator_config)),
        ResultCache::in_memory(),
    );

    let created = explainer
        .create_explanation("alice", submission("let x = 1;"), None)
        .await
        .unwrap();

    // The reader fetches the row, then stalls before filling the cache.
    let reader = {
        let explainer = explainer.clone();
        let id = created.id.clone();
        tokio::spawn(async move { explainer.get_explanation("alice", &id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    explainer
        .delete_project("alice", &created.project_id)
        .await
        .unwrap();
    reader.await.unwrap().unwrap();

    let err = explainer
        .get_explanation("alice", &created.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {:?}", err);
}

#[tokio::test]
async fn deleting_someone_elses_project_is_not_found() {
    let env = setup_env().await;
    let explainer = explainer_with(&env, None, GenerationMode::Constrained);
    let project = explainer
        .store()
        .create_project("alice", "Mine", "keep out")
        .await
        .unwrap();

    let err = explainer
        .delete_project("mallory", &project.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(count_rows(&env.pool, "projects").await, 1);
}

#[tokio::test]
async fn list_explanations_is_scoped_to_user_and_project() {
    let env = setup_env().await;
    let provider = ScriptedProvider::answering(CONSTRAINED_ANSWER, None);
    let explainer = explainer_with(&env, as_provider(&provider), GenerationMode::Constrained);

    let store = explainer.store();
    let a1 = store.create_project("alice", "First", "one").await.unwrap();
    let a2 = store.create_project("alice", "Second", "two").await.unwrap();

    for project in [&a1, &a1, &a2] {
        explainer
            .create_explanation("alice", submission("let x = 1;"), Some(project.id.clone()))
            .await
            .unwrap();
    }
    explainer
        .create_explanation("bob", submission("let y = 2;"), None)
        .await
        .unwrap();

    assert_eq!(explainer.list_explanations("alice", None).await.unwrap().len(), 3);
    assert_eq!(
        explainer
            .list_explanations("alice", Some(&a1.id))
            .await
            .unwrap()
            .len(),
        2
    );
    assert_eq!(explainer.list_explanations("bob", None).await.unwrap().len(), 1);
    assert!(explainer
        .list_explanations("bob", Some(&a1.id))
        .await
        .unwrap()
        .is_empty());
}

//! The explanation pipeline: normalize → generate → persist, and cached reads.
//!
//! Used by both the HTTP server and the `explainer explain` / `explainer get`
//! CLI commands.
//!
//! # Write path
//!
//! Looking up an explicitly named project and generation have no ordering
//! dependency, so they run concurrently. Nothing is written until both
//! succeed: the dated default project is created in the same transaction as
//! the explanation, so a failed generation leaves no project behind. A
//! missing provider credential is reported before either starts.
//!
//! # Read path
//!
//! The cache is consulted before the store and populated after a store hit.
//! Ownership is checked on both paths: a cache hit for another user's record
//! is reported exactly like a missing record.
//!
//! A read that fills the cache re-checks the store afterwards. Deletion
//! invalidates only after its commit, so either the deleter's invalidation
//! runs after the fill, or the re-check sees the row gone and evicts it.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{self, MemoryKvStore, ResultCache};
use crate::config::Config;
use crate::error::AppError;
use crate::generator::{ExplanationGenerator, GenerationError};
use crate::models::{CodeSubmission, ExplanationRecord, NewExplanation, Project};
use crate::provider::create_provider;
use crate::store::{SqliteStore, Store};
use crate::{db, migrate};

const DEFAULT_PROJECT_DESCRIPTION: &str = "Auto-created project for code explanations";

pub fn cache_key(explanation_id: &str) -> String {
    format!("explanation:{}", explanation_id)
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("explanation not found: {}", id))
}

/// Wires the SQLite store, configured provider, and cache backend together.
///
/// An unreachable cache backend degrades to an in-process cache rather than
/// preventing startup.
pub async fn build_explainer(config: &Config) -> anyhow::Result<Explainer> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let provider = create_provider(&config.generator)?;
    let generator = ExplanationGenerator::new(provider, &config.generator);

    let kv = match cache::create_store(&config.cache).await {
        Ok(kv) => kv,
        Err(e) => {
            warn!(error = %e, backend = %config.cache.backend, "cache backend unavailable, using in-process cache");
            Arc::new(MemoryKvStore::with_capacity(config.cache.max_entries))
        }
    };

    Ok(Explainer::new(
        Arc::new(SqliteStore::new(pool)),
        Arc::new(generator),
        ResultCache::new(kv, config.cache.ttl_secs),
    ))
}

/// Shared handle over the pipeline's collaborators.
#[derive(Clone)]
pub struct Explainer {
    store: Arc<dyn Store>,
    generator: Arc<ExplanationGenerator>,
    cache: ResultCache,
}

impl Explainer {
    pub fn new(
        store: Arc<dyn Store>,
        generator: Arc<ExplanationGenerator>,
        cache: ResultCache,
    ) -> Self {
        Self {
            store,
            generator,
            cache,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn create_explanation(
        &self,
        user_id: &str,
        submission: CodeSubmission,
        project_id: Option<String>,
    ) -> Result<ExplanationRecord, AppError> {
        let model = self
            .generator
            .model_name()
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::from(GenerationError::Configuration(
                    "no generative provider credential configured".to_string(),
                ))
            })?;

        let (project, result) = tokio::try_join!(
            self.find_target_project(user_id, project_id.as_deref()),
            async {
                self.generator
                    .generate(&submission.code, &submission.language, &submission.file_name)
                    .await
                    .map_err(AppError::from)
            }
        )?;

        let new = NewExplanation {
            file_name: submission.file_name,
            language: submission.language,
            original_code: submission.code,
            result,
            ai_model: model,
        };

        let record = match project {
            Some(project) => self.store.insert_explanation(&project.id, &new).await?,
            None => {
                let name = format!("Quick Explanations - {}", Utc::now().format("%Y-%m-%d"));
                let record = self
                    .store
                    .insert_explanation_in_new_project(
                        user_id,
                        &name,
                        DEFAULT_PROJECT_DESCRIPTION,
                        &new,
                    )
                    .await?;
                debug!(project_id = %record.project_id, "created default project");
                record
            }
        };

        info!(
            explanation_id = %record.id,
            project_id = %record.project_id,
            tokens = record.result.tokens_used,
            kind = record.result.explanation.kind(),
            "explanation created"
        );
        Ok(record)
    }

    /// Looks up an explicitly named project; `None` selects the dated default project.
    async fn find_target_project(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> Result<Option<Project>, AppError> {
        match project_id.filter(|p| !p.trim().is_empty()) {
            Some(id) => self
                .store
                .find_project(user_id, id)
                .await?
                .map(Some)
                .ok_or_else(|| AppError::NotFound(format!("project not found: {}", id))),
            None => Ok(None),
        }
    }

    pub async fn get_explanation(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<ExplanationRecord, AppError> {
        let key = cache_key(id);

        if let Some(record) = self.cache.get::<ExplanationRecord>(&key).await {
            if record.owner_id == user_id && record.id == id {
                return Ok(record);
            }
            return Err(not_found(id));
        }

        let record = self
            .store
            .get_explanation(id, Some(user_id))
            .await?
            .ok_or_else(|| not_found(id))?;

        if self.cache.set(&key, &record).await && !self.store.explanation_exists(id).await? {
            debug!(explanation_id = %id, "explanation deleted during read, evicting");
            self.cache.invalidate(&key).await;
        }
        Ok(record)
    }

    pub async fn list_explanations(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<ExplanationRecord>, AppError> {
        Ok(self.store.list_explanations(user_id, project_id).await?)
    }

    /// Deletes a project and evicts its explanations from the cache.
    pub async fn delete_project(&self, user_id: &str, project_id: &str) -> Result<(), AppError> {
        let removed = self
            .store
            .delete_project(user_id, project_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("project not found: {}", project_id)))?;

        for id in &removed {
            self.cache.invalidate(&cache_key(id)).await;
        }
        info!(project_id, explanations = removed.len(), "project deleted");
        Ok(())
    }
}

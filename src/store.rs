//! Persistence for projects and explanations.
//!
//! The [`Store`] trait is the contract the explanation pipeline needs from
//! the relational store; [`SqliteStore`] implements it with `sqlx`.
//!
//! Every project operation is scoped by the owning user. Explanation reads
//! can optionally be scoped the same way, in which case a record owned by
//! someone else is indistinguishable from a missing one.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::models::{
    Explanation, ExplanationDoc, ExplanationRecord, ExplanationResult, NewExplanation, Project,
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_project(&self, user_id: &str, name: &str, description: &str)
        -> Result<Project>;

    async fn find_project(&self, user_id: &str, id: &str) -> Result<Option<Project>>;

    async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>>;

    async fn update_project(
        &self,
        user_id: &str,
        id: &str,
        name: &str,
        description: &str,
    ) -> Result<Option<Project>>;

    /// Deletes a project and its explanations, returning the deleted explanation ids.
    async fn delete_project(&self, user_id: &str, id: &str) -> Result<Option<Vec<String>>>;

    /// Stores an explanation under an existing project.
    async fn insert_explanation(
        &self,
        project_id: &str,
        new: &NewExplanation,
    ) -> Result<ExplanationRecord>;

    /// Creates a project and its first explanation in one transaction.
    async fn insert_explanation_in_new_project(
        &self,
        user_id: &str,
        project_name: &str,
        project_description: &str,
        new: &NewExplanation,
    ) -> Result<ExplanationRecord>;

    async fn explanation_exists(&self, id: &str) -> Result<bool>;

    /// Fetches an explanation; with `owner` set, records of other users read as absent.
    async fn get_explanation(
        &self,
        id: &str,
        owner: Option<&str>,
    ) -> Result<Option<ExplanationRecord>>;

    async fn list_explanations(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<ExplanationRecord>>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const EXPLANATION_COLUMNS: &str = "e.id, e.project_id, p.user_id AS owner_id, e.file_name, \
    e.language, e.original_code, e.commented_code, e.explanation_text, e.explanation_doc_json, \
    e.key_points_json, e.complexity, e.improvements_json, e.tokens_used, e.ai_model, e.created_at";

fn row_to_project(row: &SqliteRow) -> Project {
    Project {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_explanation(row: &SqliteRow) -> Result<ExplanationRecord> {
    let id: String = row.get("id");
    let text: Option<String> = row.get("explanation_text");
    let doc_json: Option<String> = row.get("explanation_doc_json");

    let explanation = match (text, doc_json) {
        (Some(text), None) => Explanation::Text(text),
        (None, Some(doc)) => Explanation::Doc(
            serde_json::from_str::<ExplanationDoc>(&doc)
                .with_context(|| format!("corrupt explanation doc for {}", id))?,
        ),
        _ => bail!("explanation {} must have exactly one explanation shape", id),
    };

    let key_points_json: String = row.get("key_points_json");
    let improvements_json: String = row.get("improvements_json");
    let tokens_used: i64 = row.get("tokens_used");

    Ok(ExplanationRecord {
        project_id: row.get("project_id"),
        owner_id: row.get("owner_id"),
        file_name: row.get("file_name"),
        language: row.get("language"),
        original_code: row.get("original_code"),
        result: ExplanationResult {
            commented_code: row.get("commented_code"),
            explanation,
            key_points: serde_json::from_str(&key_points_json)
                .with_context(|| format!("corrupt key points for {}", id))?,
            complexity: row.get("complexity"),
            improvements: serde_json::from_str(&improvements_json)
                .with_context(|| format!("corrupt improvements for {}", id))?,
            tokens_used: u32::try_from(tokens_used).unwrap_or(0),
        },
        ai_model: row.get("ai_model"),
        created_at: row.get("created_at"),
        id,
    })
}

async fn insert_project_row(
    conn: &mut SqliteConnection,
    user_id: &str,
    name: &str,
    description: &str,
) -> Result<Project> {
    let now = chrono::Utc::now().timestamp();
    let project = Project {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO projects (id, user_id, name, description, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&project.id)
    .bind(&project.user_id)
    .bind(&project.name)
    .bind(&project.description)
    .bind(project.created_at)
    .bind(project.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(project)
}

async fn insert_explanation_row(
    conn: &mut SqliteConnection,
    project_id: &str,
    owner_id: String,
    new: &NewExplanation,
) -> Result<ExplanationRecord> {
    let id = uuid::Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().timestamp();

    let (explanation_text, explanation_doc_json) = match &new.result.explanation {
        Explanation::Text(text) => (Some(text.clone()), None),
        Explanation::Doc(doc) => (None, Some(serde_json::to_string(doc)?)),
    };

    sqlx::query(
        r#"
        INSERT INTO explanations (
            id, project_id, file_name, language, original_code, commented_code,
            explanation_text, explanation_doc_json, key_points_json, complexity,
            improvements_json, tokens_used, ai_model, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(project_id)
    .bind(&new.file_name)
    .bind(&new.language)
    .bind(&new.original_code)
    .bind(&new.result.commented_code)
    .bind(explanation_text)
    .bind(explanation_doc_json)
    .bind(serde_json::to_string(&new.result.key_points)?)
    .bind(&new.result.complexity)
    .bind(serde_json::to_string(&new.result.improvements)?)
    .bind(i64::from(new.result.tokens_used))
    .bind(&new.ai_model)
    .bind(created_at)
    .execute(&mut *conn)
    .await?;

    Ok(ExplanationRecord {
        id,
        project_id: project_id.to_string(),
        owner_id,
        file_name: new.file_name.clone(),
        language: new.language.clone(),
        original_code: new.original_code.clone(),
        result: new.result.clone(),
        ai_model: new.ai_model.clone(),
        created_at,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_project(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Project> {
        let mut conn = self.pool.acquire().await?;
        insert_project_row(&mut conn, user_id, name, description).await
    }

    async fn find_project(&self, user_id: &str, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, user_id, name, description, created_at, updated_at \
             FROM projects WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_project))
    }

    async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT id, user_id, name, description, created_at, updated_at \
             FROM projects WHERE user_id = ? ORDER BY created_at DESC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_project).collect())
    }

    async fn update_project(
        &self,
        user_id: &str,
        id: &str,
        name: &str,
        description: &str,
    ) -> Result<Option<Project>> {
        let now = chrono::Utc::now().timestamp();
        let updated = sqlx::query(
            "UPDATE projects SET name = ?, description = ?, updated_at = ? \
             WHERE id = ? AND user_id = ?",
        )
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }
        self.find_project(user_id, id).await
    }

    async fn delete_project(&self, user_id: &str, id: &str) -> Result<Option<Vec<String>>> {
        let mut tx = self.pool.begin().await?;

        let owned: Option<String> =
            sqlx::query_scalar("SELECT id FROM projects WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        if owned.is_none() {
            return Ok(None);
        }

        let explanation_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM explanations WHERE project_id = ?")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM explanations WHERE project_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(explanation_ids))
    }

    async fn insert_explanation(
        &self,
        project_id: &str,
        new: &NewExplanation,
    ) -> Result<ExplanationRecord> {
        let mut conn = self.pool.acquire().await?;
        let owner_id: String = sqlx::query_scalar("SELECT user_id FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&mut *conn)
            .await?
            .with_context(|| format!("project not found: {}", project_id))?;

        insert_explanation_row(&mut conn, project_id, owner_id, new).await
    }

    async fn insert_explanation_in_new_project(
        &self,
        user_id: &str,
        project_name: &str,
        project_description: &str,
        new: &NewExplanation,
    ) -> Result<ExplanationRecord> {
        let mut tx = self.pool.begin().await?;
        let project = insert_project_row(&mut tx, user_id, project_name, project_description).await?;
        let record = insert_explanation_row(&mut tx, &project.id, project.user_id, new).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn explanation_exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM explanations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn get_explanation(
        &self,
        id: &str,
        owner: Option<&str>,
    ) -> Result<Option<ExplanationRecord>> {
        let sql = format!(
            "SELECT {} FROM explanations e JOIN projects p ON p.id = e.project_id \
             WHERE e.id = ? AND (? IS NULL OR p.user_id = ?)",
            EXPLANATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(owner)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_explanation).transpose()
    }

    async fn list_explanations(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<ExplanationRecord>> {
        let sql = format!(
            "SELECT {} FROM explanations e JOIN projects p ON p.id = e.project_id \
             WHERE p.user_id = ? AND (? IS NULL OR e.project_id = ?) \
             ORDER BY e.created_at DESC, e.id ASC",
            EXPLANATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(project_id)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_explanation).collect()
    }
}

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Create projects table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create explanations table. Exactly one of explanation_text / explanation_doc_json is set.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS explanations (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            language TEXT NOT NULL,
            original_code TEXT NOT NULL,
            commented_code TEXT NOT NULL,
            explanation_text TEXT,
            explanation_doc_json TEXT,
            key_points_json TEXT NOT NULL,
            complexity TEXT NOT NULL,
            improvements_json TEXT NOT NULL,
            tokens_used INTEGER NOT NULL,
            ai_model TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            CHECK ((explanation_text IS NULL) <> (explanation_doc_json IS NULL)),
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_projects_user_id ON projects(user_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_explanations_project_id ON explanations(project_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_explanations_created_at ON explanations(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

//! HTTP server.
//!
//! Exposes the explanation pipeline and project management as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET`  | `/health` | no | Health check (returns version) |
//! | `GET`  | `/languages` | no | Supported extensions and languages |
//! | `POST` | `/explain-code` | yes | Explain an uploaded file (multipart) or pasted code (JSON) |
//! | `GET`  | `/explanations` | yes | List the caller's explanations (`?projectId=`) |
//! | `GET`  | `/explanations/{id}` | yes | Fetch one explanation (cached) |
//! | `POST` | `/projects` | yes | Create a project |
//! | `GET`  | `/projects` | yes | List the caller's projects |
//! | `PUT`  | `/projects/{id}` | yes | Rename / redescribe a project |
//! | `DELETE` | `/projects/{id}` | yes | Delete a project and its explanations |
//!
//! # Response Contract
//!
//! Success: `{ "success": true, "data": ... }`. Failures follow
//! [`AppError`]: `{ "success": false, "error": { "code": "...", "message": "..." } }`.
//!
//! # Uploads
//!
//! `POST /explain-code` accepts `multipart/form-data` with a `file` part and an
//! optional `projectId` part. The file is filtered against the same
//! extension allow-list the input normalizer uses before any of it is parsed.
//! Any other content type is read as JSON `{ code, language?, fileName?, projectId? }`.

use axum::{
    extract::{DefaultBodyLimit, FromRef, FromRequest, Multipart, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{AuthUser, TokenKeys};
use crate::config::Config;
use crate::error::AppError;
use crate::explain::{build_explainer, Explainer};
use crate::input::{
    extension_of, is_allowed_extension, parse_raw_code_input, parse_uploaded_file,
    supported_languages, RawCodeInput, UploadedFile,
};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub explainer: Explainer,
    pub keys: Arc<TokenKeys>,
}

impl FromRef<AppState> for Arc<TokenKeys> {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}

impl AppState {
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let secret = config.auth.secret()?;
        Ok(Self {
            explainer: build_explainer(config).await?,
            keys: Arc::new(TokenKeys::new(&secret, config.auth.access_token_ttl_secs)),
        })
    }
}

pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/languages", get(handle_languages))
        .route("/explain-code", post(handle_explain_code))
        .route("/explanations", get(handle_list_explanations))
        .route("/explanations/{id}", get(handle_get_explanation))
        .route("/projects", post(handle_create_project).get(handle_list_projects))
        .route(
            "/projects/{id}",
            put(handle_edit_project).delete(handle_delete_project),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind`, runs migrations, connects the cache, and serves
/// until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    let app = build_router(state, config.server.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(
        bind = %config.server.bind,
        provider = %config.generator.provider,
        cache = %config.cache.backend,
        "explainer server listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_languages() -> Json<Value> {
    ok(supported_languages())
}

// ============ POST /explain-code ============

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplainCodeBody {
    code: Option<String>,
    language: Option<String>,
    file_name: Option<String>,
    project_id: Option<String>,
}

/// A submission as received, before normalization.
enum Submitted {
    File(Option<UploadedFile>),
    Text(RawCodeInput),
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"))
}

async fn read_multipart(mut multipart: Multipart) -> Result<(Submitted, Option<String>), AppError> {
    let mut file = None;
    let mut saw_file_part = false;
    let mut text = ExplainCodeBody::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                saw_file_part = true;
                let file_name = field.file_name().unwrap_or_default().to_string();
                if !is_allowed_extension(&file_name) {
                    return Err(AppError::Validation(format!(
                        "Unsupported file type: {}. Only code files are allowed.",
                        extension_of(&file_name)
                    )));
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(e.body_text()))?;
                file = Some(UploadedFile {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            "code" | "language" | "fileName" | "projectId" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(e.body_text()))?;
                match name.as_str() {
                    "code" => text.code = Some(value),
                    "language" => text.language = Some(value),
                    "fileName" => text.file_name = Some(value),
                    _ => text.project_id = Some(value),
                }
            }
            _ => {}
        }
    }

    let project_id = text.project_id.take();
    if saw_file_part {
        return Ok((Submitted::File(file), project_id));
    }
    if text.code.is_some() {
        return Ok((
            Submitted::Text(RawCodeInput {
                code: text.code,
                language: text.language,
                file_name: text.file_name,
            }),
            project_id,
        ));
    }
    Err(AppError::Validation("No file found in upload".to_string()))
}

async fn handle_explain_code(
    State(state): State<AppState>,
    user: AuthUser,
    request: Request,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let (submitted, project_id) = if is_multipart(&request) {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        read_multipart(multipart).await?
    } else {
        let Json(body) = Json::<ExplainCodeBody>::from_request(request, &state)
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        if body.code.is_none() {
            return Err(AppError::Validation(
                "Please provide code via file upload or text paste".to_string(),
            ));
        }
        (
            Submitted::Text(RawCodeInput {
                code: body.code,
                language: body.language,
                file_name: body.file_name,
            }),
            body.project_id,
        )
    };

    let submission = match submitted {
        Submitted::File(file) => parse_uploaded_file(file.as_ref())?,
        Submitted::Text(raw) => parse_raw_code_input(raw)?,
    };

    let record = state
        .explainer
        .create_explanation(&user.id, submission, project_id)
        .await?;

    Ok((StatusCode::CREATED, ok(record)))
}

// ============ /explanations ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListExplanationsQuery {
    project_id: Option<String>,
}

async fn handle_list_explanations(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListExplanationsQuery>,
) -> Result<Json<Value>, AppError> {
    let records = state
        .explainer
        .list_explanations(&user.id, query.project_id.as_deref())
        .await?;
    Ok(ok(records))
}

async fn handle_get_explanation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let record = state.explainer.get_explanation(&user.id, &id).await?;
    Ok(ok(record))
}

// ============ /projects ============

#[derive(Debug, Deserialize)]
struct ProjectBody {
    name: Option<String>,
    description: Option<String>,
}

impl ProjectBody {
    fn validate(self) -> Result<(String, String), AppError> {
        let name = self.name.map(|n| n.trim().to_string()).unwrap_or_default();
        let description = self
            .description
            .map(|d| d.trim().to_string())
            .unwrap_or_default();
        if name.is_empty() || description.is_empty() {
            return Err(AppError::Validation(
                "Name and Description are required".to_string(),
            ));
        }
        if name.chars().count() < 3 {
            return Err(AppError::Validation(
                "Name must be at least 3 characters long".to_string(),
            ));
        }
        Ok((name, description))
    }
}

fn project_not_found(id: &str) -> AppError {
    AppError::NotFound(format!("project not found: {}", id))
}

async fn handle_create_project(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ProjectBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let (name, description) = body.validate()?;
    let project = state
        .explainer
        .store()
        .create_project(&user.id, &name, &description)
        .await?;
    Ok((StatusCode::CREATED, ok(project)))
}

async fn handle_list_projects(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Value>, AppError> {
    let projects = state.explainer.store().list_projects(&user.id).await?;
    Ok(ok(projects))
}

async fn handle_edit_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<ProjectBody>,
) -> Result<Json<Value>, AppError> {
    let (name, description) = body.validate()?;
    let project = state
        .explainer
        .store()
        .update_project(&user.id, &id, &name, &description)
        .await?
        .ok_or_else(|| project_not_found(&id))?;
    Ok(ok(project))
}

async fn handle_delete_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.explainer.delete_project(&user.id, &id).await?;
    Ok(ok(json!({ "id": id })))
}

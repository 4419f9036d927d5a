//! Notebook and kernel endpoints: CRUD, cell operations, direct cell
//! execution, kernel reset and variable inspection.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use cl_domain::notebook::CellKind;
use cl_notebook::CellPatch;

use crate::state::AppState;

use super::ApiError;
use super::chat::UserQuery;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Notebook CRUD
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateNotebookRequest {
    #[serde(default)]
    pub user_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateNotebookRequest>,
) -> Json<serde_json::Value> {
    let notebook = state
        .notebooks
        .create(body.user_id, body.title, body.description, vec![]);
    Json(json!(notebook))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Json<serde_json::Value> {
    Json(json!({"notebooks": state.notebooks.list(query.user_id)}))
}

pub async fn get_notebook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .notebooks
        .get(&id)
        .map(|nb| Json(json!(nb)))
        .ok_or_else(|| ApiError::not_found(format!("notebook {id}")))
}

#[derive(Debug, Deserialize)]
pub struct UpdateNotebookRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateNotebookRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let notebook = state.notebooks.rename(&id, body.title, body.description)?;
    Ok(Json(json!(notebook)))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.notebooks.delete(&id) {
        return Err(ApiError::not_found(format!("notebook {id}")));
    }
    // The kernel goes with its notebook.
    state.kernels.destroy(&id.to_string()).await;
    Ok(Json(json!({"deleted": true})))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cell operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct AddCellRequest {
    #[serde(default = "d_code")]
    pub kind: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub index: Option<usize>,
}

fn d_code() -> String {
    "code".into()
}

fn parse_kind(kind: &str) -> Result<CellKind, ApiError> {
    match kind {
        "code" => Ok(CellKind::Code),
        "markdown" => Ok(CellKind::Markdown),
        other => Err(ApiError::bad_request(format!("unknown cell kind: {other}"))),
    }
}

pub async fn add_cell(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AddCellRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = parse_kind(&body.kind)?;
    let cell = state.notebooks.add_cell(&id, kind, body.source, body.index)?;
    Ok(Json(json!(cell)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCellRequest {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

pub async fn update_cell(
    State(state): State<AppState>,
    Path((id, cell_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateCellRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = body.kind.as_deref().map(parse_kind).transpose()?;
    let patch = CellPatch {
        source: body.source,
        kind,
        ..Default::default()
    };
    let cell = state.notebooks.update_cell(&id, &cell_id, patch)?;
    Ok(Json(json!(cell)))
}

pub async fn delete_cell(
    State(state): State<AppState>,
    Path((id, cell_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.notebooks.delete_cell(&id, &cell_id)?;
    Ok(Json(json!({"deleted": true})))
}

#[derive(Debug, Deserialize)]
pub struct MoveCellRequest {
    pub new_index: usize,
}

pub async fn move_cell(
    State(state): State<AppState>,
    Path((id, cell_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<MoveCellRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.notebooks.move_cell(&id, &cell_id, body.new_index)?;
    Ok(Json(json!(state.notebooks.get(&id))))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    /// When set, the outputs are saved onto this cell.
    #[serde(default)]
    pub cell_id: Option<Uuid>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

pub async fn execute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ExecuteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.notebooks.get(&id).is_none() {
        return Err(ApiError::not_found(format!("notebook {id}")));
    }

    let timeout = Duration::from_secs(
        body.timeout_secs
            .unwrap_or(state.config.kernel.exec_timeout_secs)
            .clamp(1, 300),
    );

    let kernel = state.kernels.get_or_create(&id.to_string());
    let outcome = kernel.execute(&body.code, timeout).await?;

    match body.cell_id {
        Some(cell_id) => {
            state.notebooks.save_cell_execution(
                &id,
                &cell_id,
                outcome.outputs.clone(),
                outcome.execution_count,
            )?;
        }
        None => {
            state
                .notebooks
                .update_execution_count(&id, outcome.execution_count)?;
        }
    }

    Ok(Json(json!({
        "success": outcome.success,
        "outputs": outcome.outputs,
        "execution_count": outcome.execution_count,
        "execution_time_ms": outcome.execution_time_ms,
    })))
}

pub async fn reset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<serde_json::Value> {
    let reset = state.kernels.reset(&id.to_string()).await;
    Json(json!({"reset": reset}))
}

pub async fn variables(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.kernels.get(&id.to_string()) {
        Some(kernel) => {
            let vars = kernel.variables().await?;
            Ok(Json(json!({"variables": vars})))
        }
        None => Ok(Json(json!({"variables": {}}))),
    }
}

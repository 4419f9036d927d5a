//! Notebook-scoped agent endpoint: the registry is built with this
//! notebook's kernel/store handles and the caller's authorization bit;
//! conversation context lives in the per-(user, notebook) history ring.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use cl_agent::CancelToken;
use cl_domain::chat::ChatMessage;

use crate::bridge::{frame, spawn_bridge};
use crate::state::AppState;

use super::{sse_response, ApiError};
use super::chat::UserQuery;

#[derive(Debug, Deserialize)]
pub struct NotebookAgentRequest {
    #[serde(default)]
    pub user_id: i64,
    pub message: String,
    /// Grants the agent the privileged notebook tools for this turn.
    #[serde(default)]
    pub authorized: bool,
    #[serde(default)]
    pub provider: Option<String>,
}

pub async fn agent_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<NotebookAgentRequest>,
) -> Response {
    let Some(notebook) = state.notebooks.get(&id) else {
        return ApiError::not_found(format!("notebook {id}")).into_response();
    };

    // Give the model a view of the notebook it is working in. Variables
    // are only read from an already-live kernel, never by spawning one.
    let mut context = format!(
        "Notebook \"{}\" with {} cell(s).",
        notebook.title,
        notebook.cells.len()
    );
    if let Some(kernel) = state.kernels.get(&id.to_string()) {
        if let Ok(vars) = kernel.variables().await {
            if !vars.is_empty() {
                let mut entries: Vec<String> =
                    vars.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                entries.sort();
                context.push_str("\nKernel variables: ");
                context.push_str(&entries.join(", "));
            }
        }
    }

    let nb_key = id.to_string();
    let mut messages = state.history.get(body.user_id, &nb_key);
    messages.push(ChatMessage::user(&body.message));
    state
        .history
        .push(body.user_id, &nb_key, ChatMessage::user(&body.message));

    let registry = state.notebook_tools(body.user_id, id, body.authorized);
    let agent = match state.agent(body.provider.as_deref(), registry) {
        Ok(agent) => agent.with_context(context),
        Err(e) => return ApiError::from(e).into_response(),
    };

    let cancel = CancelToken::new();
    let agent_rx = agent.run(messages, cancel.clone());

    let history = state.history.clone();
    let user_id = body.user_id;
    let frames = spawn_bridge(
        agent_rx,
        cancel,
        Box::new(move |record| {
            history.push(user_id, &nb_key, ChatMessage::assistant(record.answer));
            None
        }),
    );

    sse_response(
        vec![frame(
            "start",
            json!({"notebook_id": id, "authorized": body.authorized}),
        )],
        frames,
    )
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UserQuery>,
) -> Json<serde_json::Value> {
    let messages = state.history.get(query.user_id, &id.to_string());
    Json(json!({"messages": messages}))
}

pub async fn clear_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UserQuery>,
) -> Json<serde_json::Value> {
    state.history.clear(query.user_id, &id.to_string());
    Json(json!({"cleared": true}))
}

//! HTTP surface: routing, the SSE response shape, and error mapping.

pub mod chat;
pub mod notebook_agent;
pub mod notebooks;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use tokio::sync::mpsc;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/tools", get(tools_manifest))
        .route("/v1/chat/stream", post(chat::chat_stream))
        .route("/v1/conversations", get(chat::list_conversations))
        .route("/v1/conversations/:id/messages", get(chat::list_messages))
        .route(
            "/v1/notebooks",
            post(notebooks::create).get(notebooks::list),
        )
        .route(
            "/v1/notebooks/:id",
            get(notebooks::get_notebook)
                .put(notebooks::update)
                .delete(notebooks::delete),
        )
        .route("/v1/notebooks/:id/cells", post(notebooks::add_cell))
        .route(
            "/v1/notebooks/:id/cells/:cell_id",
            put(notebooks::update_cell).delete(notebooks::delete_cell),
        )
        .route(
            "/v1/notebooks/:id/cells/:cell_id/move",
            post(notebooks::move_cell),
        )
        .route("/v1/notebooks/:id/execute", post(notebooks::execute))
        .route("/v1/notebooks/:id/reset", post(notebooks::reset))
        .route("/v1/notebooks/:id/variables", get(notebooks::variables))
        .route(
            "/v1/notebooks/:id/agent/stream",
            post(notebook_agent::agent_stream),
        )
        .route(
            "/v1/notebooks/:id/agent/history",
            get(notebook_agent::get_history).delete(notebook_agent::clear_history),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// The OpenAI-convention tool manifest for the base tool set.
async fn tools_manifest(
    State(state): State<AppState>,
    Query(query): Query<chat::UserQuery>,
) -> Json<serde_json::Value> {
    let registry = state.base_tools(query.user_id);
    Json(serde_json::json!({"tools": registry.manifest()}))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the streaming response: `prelude` frames first, then every
/// frame the bridge forwards. The anti-buffering headers keep proxies
/// from batching events.
pub fn sse_response(prelude: Vec<String>, mut frames: mpsc::Receiver<String>) -> Response {
    let stream = async_stream::stream! {
        for f in prelude {
            yield Ok::<_, std::convert::Infallible>(f);
        }
        while let Some(f) = frames.recv().await {
            yield Ok(f);
        }
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(stream))
        .expect("static header set is valid")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON error response; domain errors map onto HTTP statuses.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<cl_domain::error::Error> for ApiError {
    fn from(e: cl_domain::error::Error) -> Self {
        use cl_domain::error::Error;
        let status = match &e {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}

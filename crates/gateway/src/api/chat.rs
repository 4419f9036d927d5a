//! Conversation chat endpoint: one POST starts an agent turn whose
//! events stream back as SSE; the message log persists on completion.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use cl_agent::CancelToken;
use cl_domain::chat::ChatMessage;
use cl_sessions::MessageRole;

use crate::bridge::{frame, spawn_bridge};
use crate::state::AppState;

use super::{sse_response, ApiError};

#[derive(Debug, Deserialize)]
pub struct ChatStreamRequest {
    #[serde(default)]
    pub user_id: i64,
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    /// Optional LLM provider override.
    #[serde(default)]
    pub provider: Option<String>,
}

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatStreamRequest>,
) -> Response {
    let conversation =
        state
            .conversations
            .resolve_or_create(body.conversation_id, body.user_id, &body.message);
    let user_message = state.conversations.append_message(
        &conversation.id,
        MessageRole::User,
        &body.message,
        None,
        None,
    );

    // The log already contains the user turn just appended.
    let messages: Vec<ChatMessage> = state
        .conversations
        .messages(&conversation.id)
        .into_iter()
        .map(|m| match m.role {
            MessageRole::User => ChatMessage::user(m.content),
            MessageRole::Assistant => ChatMessage::assistant(m.content),
        })
        .collect();

    let registry = state.base_tools(body.user_id);
    let agent = match state.agent(body.provider.as_deref(), registry) {
        Ok(agent) => agent,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let cancel = CancelToken::new();
    let agent_rx = agent.run(messages, cancel.clone());

    let conversations = state.conversations.clone();
    let conversation_id = conversation.id;
    let frames = spawn_bridge(
        agent_rx,
        cancel,
        Box::new(move |record| {
            let thought = (!record.thought.is_empty()).then_some(record.thought);
            let steps = (!record.steps.is_empty()).then_some(record.steps);
            let message = conversations.append_message(
                &conversation_id,
                MessageRole::Assistant,
                record.answer,
                thought,
                steps,
            );
            Some(message.id)
        }),
    );

    sse_response(
        vec![frame(
            "start",
            json!({"conversation_id": conversation_id, "message_id": user_message.id}),
        )],
        frames,
    )
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub user_id: i64,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Json<serde_json::Value> {
    let conversations = state.conversations.list(query.user_id);
    Json(json!({"conversations": conversations}))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.conversations.get(&id).is_none() {
        return Err(ApiError::not_found(format!("conversation {id}")));
    }
    let messages = state.conversations.messages(&id);
    Ok(Json(json!({"messages": messages})))
}

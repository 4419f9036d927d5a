//! Conversation store: the durable message log behind the chat surface.
//!
//! Relational persistence is an external collaborator; this store keeps
//! the same narrow interface over an in-memory map so the bridge can
//! persist assistant messages (content, last thought, step trace) and
//! the API can page through a conversation.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use cl_domain::agent::AgentStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One persisted message. Assistant messages optionally carry the last
/// thought and the full ReAct step trace of the turn that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub react_steps: Option<Vec<AgentStep>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ConversationStore {
    conversations: RwLock<HashMap<Uuid, Conversation>>,
    messages: RwLock<HashMap<Uuid, Vec<StoredMessage>>>,
    next_message_id: RwLock<i64>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
            next_message_id: RwLock::new(1),
        }
    }

    pub fn create(&self, user_id: i64, title: impl Into<String>) -> Conversation {
        let now = Utc::now();
        let conv = Conversation {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            created_at: now,
            updated_at: now,
        };
        self.conversations.write().insert(conv.id, conv.clone());
        conv
    }

    pub fn get(&self, id: &Uuid) -> Option<Conversation> {
        self.conversations.read().get(id).cloned()
    }

    /// Resolve a conversation, creating one titled after the first
    /// message when the id is absent or unknown.
    pub fn resolve_or_create(
        &self,
        id: Option<Uuid>,
        user_id: i64,
        first_message: &str,
    ) -> Conversation {
        if let Some(id) = id {
            if let Some(conv) = self.get(&id) {
                return conv;
            }
        }
        let title: String = first_message.chars().take(50).collect();
        self.create(user_id, title)
    }

    /// Append a message and return its assigned id.
    pub fn append_message(
        &self,
        conversation_id: &Uuid,
        role: MessageRole,
        content: impl Into<String>,
        thought: Option<String>,
        react_steps: Option<Vec<AgentStep>>,
    ) -> StoredMessage {
        let id = {
            let mut next = self.next_message_id.write();
            let id = *next;
            *next += 1;
            id
        };
        let msg = StoredMessage {
            id,
            conversation_id: *conversation_id,
            role,
            content: content.into(),
            thought,
            react_steps,
            created_at: Utc::now(),
        };
        self.messages
            .write()
            .entry(*conversation_id)
            .or_default()
            .push(msg.clone());
        if let Some(conv) = self.conversations.write().get_mut(conversation_id) {
            conv.updated_at = msg.created_at;
        }
        msg
    }

    pub fn messages(&self, conversation_id: &Uuid) -> Vec<StoredMessage> {
        self.messages
            .read()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn list(&self, user_id: i64) -> Vec<Conversation> {
        let mut out: Vec<Conversation> = self
            .conversations
            .read()
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_monotonic() {
        let store = ConversationStore::new();
        let conv = store.create(1, "t");
        let a = store.append_message(&conv.id, MessageRole::User, "q", None, None);
        let b = store.append_message(&conv.id, MessageRole::Assistant, "a", None, None);
        assert!(b.id > a.id);
        assert_eq!(store.messages(&conv.id).len(), 2);
    }

    #[test]
    fn resolve_or_create_titles_from_first_message() {
        let store = ConversationStore::new();
        let conv = store.resolve_or_create(None, 1, "what is sqrt(144)?");
        assert_eq!(conv.title, "what is sqrt(144)?");

        let same = store.resolve_or_create(Some(conv.id), 1, "ignored");
        assert_eq!(same.id, conv.id);
    }

    #[test]
    fn assistant_message_carries_step_trace() {
        let store = ConversationStore::new();
        let conv = store.create(1, "t");
        let steps = vec![cl_domain::agent::AgentStep::thought("why")];
        let msg = store.append_message(
            &conv.id,
            MessageRole::Assistant,
            "answer",
            Some("why".into()),
            Some(steps),
        );
        assert_eq!(msg.thought.as_deref(), Some("why"));
        assert_eq!(msg.react_steps.as_ref().unwrap().len(), 1);
    }
}

//! Per-(user, notebook) agent conversation history.
//!
//! A capped in-memory ring: the notebook agent re-reads it to give the
//! LLM context across turns. On overflow only the most recent half is
//! retained, so old turns age out rather than growing without bound.

use parking_lot::RwLock;
use std::collections::HashMap;

use cl_domain::chat::ChatMessage;
use cl_domain::config::HistoryConfig;

type Key = (i64, String);

pub struct AgentHistory {
    entries: RwLock<HashMap<Key, Vec<ChatMessage>>>,
    max_messages: usize,
    keep_on_overflow: usize,
}

impl AgentHistory {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_messages: config.max_messages.max(1),
            keep_on_overflow: config.keep_on_overflow.max(1),
        }
    }

    /// Snapshot of the history for one (user, notebook) pair.
    pub fn get(&self, user_id: i64, notebook_id: &str) -> Vec<ChatMessage> {
        self.entries
            .read()
            .get(&(user_id, notebook_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Append a message, trimming to the newest `keep_on_overflow`
    /// entries once the cap is exceeded.
    pub fn push(&self, user_id: i64, notebook_id: &str, message: ChatMessage) {
        let mut entries = self.entries.write();
        let list = entries
            .entry((user_id, notebook_id.to_string()))
            .or_default();
        list.push(message);
        if list.len() > self.max_messages {
            let drop = list.len() - self.keep_on_overflow;
            list.drain(..drop);
            tracing::debug!(
                user_id,
                notebook_id,
                kept = self.keep_on_overflow,
                "agent history trimmed"
            );
        }
    }

    pub fn clear(&self, user_id: i64, notebook_id: &str) {
        self.entries
            .write()
            .remove(&(user_id, notebook_id.to_string()));
    }

    pub fn len(&self, user_id: i64, notebook_id: &str) -> usize {
        self.entries
            .read()
            .get(&(user_id, notebook_id.to_string()))
            .map_or(0, Vec::len)
    }
}

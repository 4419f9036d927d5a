//! Conversation state: the durable message log and the per-notebook
//! agent history ring.

mod history;
mod store;

pub use history::AgentHistory;
pub use store::{Conversation, ConversationStore, MessageRole, StoredMessage};

//! Session module - Conversation state management
//!
//! This module provides in-memory conversation storage for AttoClaw.
//! Conversations are keyed by id and hold the ordered message history the
//! turn loop operates on. In-flight agent state is deliberately not persisted
//! across restarts.
//!
//! # Example
//!
//! ```
//! use attoclaw::session::{ConversationStore, Message};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = ConversationStore::new();
//!
//!     let mut convo = store.get_or_create("cli").await;
//!     convo.push(Message::user("Hello!"));
//!     convo.push(Message::assistant("Hi there!"));
//!
//!     store.save(convo).await;
//! }
//! ```

pub mod types;

pub use types::{Conversation, ImageAttachment, Message, Role, ToolCall};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory store for conversation state.
///
/// # Thread Safety
///
/// The store uses `Arc<RwLock>` internally, making it safe to clone and
/// share across async tasks. Distinct conversations can run turn sequences
/// concurrently; the turn loop serializes work within one conversation.
pub struct ConversationStore {
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl ConversationStore {
    /// Create a new empty conversation store.
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get an existing conversation or create a new empty one.
    ///
    /// Returns a clone; call [`ConversationStore::save`] to publish changes.
    pub async fn get_or_create(&self, id: &str) -> Conversation {
        {
            let conversations = self.conversations.read().await;
            if let Some(convo) = conversations.get(id) {
                return convo.clone();
            }
        }

        let convo = Conversation::new(id);
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(id.to_string())
            .or_insert_with(|| convo.clone())
            .clone()
    }

    /// Get a conversation by id without creating it.
    pub async fn get(&self, id: &str) -> Option<Conversation> {
        let conversations = self.conversations.read().await;
        conversations.get(id).cloned()
    }

    /// Save a conversation back to the store.
    pub async fn save(&self, conversation: Conversation) {
        let mut conversations = self.conversations.write().await;
        conversations.insert(conversation.id.clone(), conversation);
    }

    /// Remove a conversation from the store.
    pub async fn delete(&self, id: &str) {
        let mut conversations = self.conversations.write().await;
        conversations.remove(id);
    }

    /// List all conversation ids, sorted.
    pub async fn list(&self) -> Vec<String> {
        let conversations = self.conversations.read().await;
        let mut ids: Vec<String> = conversations.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Get the number of stored conversations.
    pub async fn len(&self) -> usize {
        let conversations = self.conversations.read().await;
        conversations.len()
    }

    /// Check whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Clone for ConversationStore {
    fn clone(&self) -> Self {
        Self {
            conversations: Arc::clone(&self.conversations),
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

//! Per-user conversation state.
//!
//! History is ephemeral: it lives for the lifetime of the process and is never
//! evicted. Every operation is total over the key space; unknown users simply
//! have an empty history and no continuation token.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::chat::Message;

/// Everything remembered about one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    /// Empty, or starts with exactly one system message.
    pub history: Vec<Message>,
    /// Upstream `previous_response_id`; replaces history replay when present.
    pub continuation_token: Option<String>,
}

/// Backing map shared between store handles.
pub type ConversationMap = Arc<RwLock<HashMap<String, ConversationState>>>;

/// Storage for conversation history and continuation tokens, keyed by user id.
///
/// `update_history` is a full replace. Callers do their own read-modify-write
/// and must serialise turns for the same user if they need to avoid lost updates.
pub trait ConversationStore: Send + Sync + 'static {
    fn get_history(&self, user_id: &str) -> Vec<Message>;

    fn update_history(&self, user_id: &str, history: Vec<Message>);

    fn get_continuation_token(&self, user_id: &str) -> Option<String>;

    fn set_continuation_token(&self, user_id: &str, token: String);

    /// Drops history and token for one user and returns the (now empty) history.
    fn clear(&self, user_id: &str) -> Vec<Message>;

    /// Drops every conversation.
    fn clear_all(&self);
}

/// An in-memory implementation of [`ConversationStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryConversationStore {
    conversations: ConversationMap,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store over an existing backing map.
    pub fn with_map(conversations: ConversationMap) -> Self {
        Self { conversations }
    }

    /// Number of users with any remembered state.
    pub fn len(&self) -> usize {
        self.conversations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.read().is_empty()
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn get_history(&self, user_id: &str) -> Vec<Message> {
        self.conversations
            .read()
            .get(user_id)
            .map(|state| state.history.clone())
            .unwrap_or_default()
    }

    fn update_history(&self, user_id: &str, history: Vec<Message>) {
        self.conversations
            .write()
            .entry(user_id.to_string())
            .or_default()
            .history = history;
    }

    fn get_continuation_token(&self, user_id: &str) -> Option<String> {
        self.conversations
            .read()
            .get(user_id)
            .and_then(|state| state.continuation_token.clone())
    }

    fn set_continuation_token(&self, user_id: &str, token: String) {
        self.conversations
            .write()
            .entry(user_id.to_string())
            .or_default()
            .continuation_token = Some(token);
    }

    fn clear(&self, user_id: &str) -> Vec<Message> {
        self.conversations.write().remove(user_id);
        Vec::new()
    }

    fn clear_all(&self) {
        self.conversations.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_has_no_state() {
        let store = InMemoryConversationStore::new();
        assert!(store.get_history("never-seen-id").is_empty());
        assert_eq!(store.get_continuation_token("never-seen-id"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn update_history_replaces_instead_of_appending() {
        let store = InMemoryConversationStore::new();
        store.update_history("u", vec![Message::system("s"), Message::user("a")]);
        store.update_history("u", vec![Message::system("s")]);

        assert_eq!(store.get_history("u"), vec![Message::system("s")]);
    }

    #[test]
    fn continuation_token_is_overwritten() {
        let store = InMemoryConversationStore::new();
        store.set_continuation_token("u", "resp_1".into());
        store.set_continuation_token("u", "resp_2".into());

        assert_eq!(store.get_continuation_token("u").as_deref(), Some("resp_2"));
    }

    #[test]
    fn clear_removes_history_and_token_for_one_user() {
        let store = InMemoryConversationStore::new();
        store.update_history("a", vec![Message::user("hi")]);
        store.set_continuation_token("a", "resp_a".into());
        store.update_history("b", vec![Message::user("yo")]);

        assert!(store.clear("a").is_empty());
        assert!(store.get_history("a").is_empty());
        assert_eq!(store.get_continuation_token("a"), None);
        assert_eq!(store.get_history("b").len(), 1);
    }

    #[test]
    fn clear_all_resets_every_user() {
        let store = InMemoryConversationStore::new();
        store.update_history("a", vec![Message::user("hi")]);
        store.set_continuation_token("b", "resp_b".into());

        store.clear_all();
        assert!(store.is_empty());
    }

    #[test]
    fn handles_sharing_a_map_see_each_other() {
        let map = ConversationMap::default();
        let first = InMemoryConversationStore::with_map(map.clone());
        let second = InMemoryConversationStore::with_map(map);

        first.set_continuation_token("u", "resp_1".into());
        assert_eq!(second.get_continuation_token("u").as_deref(), Some("resp_1"));
    }
}

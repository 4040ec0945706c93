//! Per-conversation session state.
//!
//! A session is a flat key/value map accumulated across the steps of one
//! flow run. Sessions are keyed by the normalized contact id and are never
//! visible across conversations.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Stored state for one conversation.
#[derive(Debug, Clone, Default)]
pub struct Session {
    values: HashMap<String, Value>,
}

/// Concurrent session store.
///
/// Operations on an unknown conversation create an empty session rather
/// than failing.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one value.
    pub fn get(&self, conversation_id: &str, key: &str) -> Option<Value> {
        let session = self.sessions.entry(conversation_id.to_string()).or_default();
        session.values.get(key).cloned()
    }

    /// Write one value. Last write wins.
    pub fn update(&self, conversation_id: &str, key: impl Into<String>, value: impl Into<Value>) {
        let mut session = self.sessions.entry(conversation_id.to_string()).or_default();
        session.values.insert(key.into(), value.into());
    }

    /// Drop everything stored for a conversation.
    pub fn clear(&self, conversation_id: &str) {
        if self.sessions.remove(conversation_id).is_some() {
            tracing::debug!(conversation_id = %conversation_id, "Session cleared");
        }
    }

    /// Copy of all values stored for a conversation.
    pub fn snapshot(&self, conversation_id: &str) -> HashMap<String, Value> {
        self.sessions
            .get(conversation_id)
            .map(|s| s.values.clone())
            .unwrap_or_default()
    }

    /// Whether a session exists for the conversation.
    pub fn contains(&self, conversation_id: &str) -> bool {
        self.sessions.contains_key(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Session access scoped to a single conversation.
///
/// Actions receive this instead of the store so flow code can only touch
/// the conversation it runs for.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    store: Arc<SessionStore>,
    conversation_id: String,
}

impl SessionHandle {
    pub fn new(store: Arc<SessionStore>, conversation_id: impl Into<String>) -> Self {
        Self {
            store,
            conversation_id: conversation_id.into(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(&self.conversation_id, key)
    }

    /// Read a value rendered as text. Strings come back without quotes.
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    pub fn update(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.store.update(&self.conversation_id, key, value);
    }

    pub fn clear(&self) {
        self.store.clear(&self.conversation_id);
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.store.snapshot(&self.conversation_id)
    }
}

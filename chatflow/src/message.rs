//! Message types flowing through the bot.
//!
//! Inbound traffic is normalized into an [`Event`]; everything the bot says
//! back is an [`OutgoingMessage`].

use chatflow_common::error::{Error, Result};
use chatflow_common::logging::generate_span_id;
use chatflow_common::util::normalize_contact_id;
use serde::{Deserialize, Serialize};

/// Where an event came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventSource {
    /// A message received from the provider webhook
    Inbound,
    /// A programmatic trigger naming a flow directly
    Dispatch { flow_id: String },
}

/// Inbound normalized message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event ID
    id: String,
    /// Normalized contact id (digits only)
    conversation_id: String,
    /// Message text
    body: String,
    /// Timestamp (Unix millis)
    timestamp: i64,
    /// Payload as received, kept for actions that need provider-specific fields
    raw_payload: serde_json::Value,
    /// Origin of the event
    source: EventSource,
}

impl Event {
    /// Normalize an inbound provider message.
    ///
    /// Fails with [`Error::Validation`] when the sender has no digits or the
    /// body is blank; such events are dropped before reaching the dispatcher.
    pub fn inbound(
        from: &str,
        body: impl Into<String>,
        raw_payload: serde_json::Value,
    ) -> Result<Self> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(Error::Validation("message body is empty".into()));
        }
        Self::build(from, body, raw_payload, EventSource::Inbound)
    }

    /// Build the synthetic event that starts a programmatically dispatched flow.
    pub fn dispatch(
        flow_id: impl Into<String>,
        conversation_id: &str,
        payload: serde_json::Value,
    ) -> Result<Self> {
        let source = EventSource::Dispatch {
            flow_id: flow_id.into(),
        };
        Self::build(conversation_id, String::new(), payload, source)
    }

    fn build(
        from: &str,
        body: String,
        raw_payload: serde_json::Value,
        source: EventSource,
    ) -> Result<Self> {
        let conversation_id = normalize_contact_id(from);
        if conversation_id.is_empty() {
            return Err(Error::Validation(format!(
                "contact id {from:?} contains no digits"
            )));
        }

        Ok(Self {
            id: generate_span_id(),
            conversation_id,
            body,
            timestamp: chrono::Utc::now().timestamp_millis(),
            raw_payload,
            source,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn source(&self) -> &EventSource {
        &self.source
    }

    /// Look up a string field in the raw payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.raw_payload.get(key).and_then(|v| v.as_str())
    }
}

/// Outgoing message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutgoingContent {
    /// Plain text
    Text { text: String },
    /// Media by URL, with an optional caption
    Media {
        url: String,
        caption: Option<String>,
    },
}

/// Outgoing message to send to a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Target contact id
    pub to: String,
    /// Message content
    pub content: OutgoingContent,
}

impl OutgoingMessage {
    /// Text message to a contact.
    pub fn text(to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            content: OutgoingContent::Text { text: text.into() },
        }
    }

    /// Media message to a contact.
    pub fn media(to: impl Into<String>, url: impl Into<String>, caption: Option<String>) -> Self {
        Self {
            to: to.into(),
            content: OutgoingContent::Media {
                url: url.into(),
                caption,
            },
        }
    }

    /// Get the text content if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            OutgoingContent::Text { text } => Some(text),
            OutgoingContent::Media { .. } => None,
        }
    }
}

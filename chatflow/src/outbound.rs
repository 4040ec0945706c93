//! Outbound adapters.
//!
//! - [`HttpOutbound`] posts each reply as JSON to a relay endpoint that owns
//!   the provider credentials.
//! - [`MemoryOutbound`] records replies instead of sending them; the binary
//!   uses it for dry-run mode when no relay is configured.

use crate::message::{OutgoingContent, OutgoingMessage};
use crate::traits::{ChannelError, ChannelResult, Outbound};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

// ============================================================================
// HttpOutbound
// ============================================================================

/// Generic HTTP relay.
///
/// Each message is posted as `{"to": ..., "type": "text", "text": ...}` or
/// `{"to": ..., "type": "media", "url": ..., "caption": ...}`; the relay
/// answers with `{"id": ...}`.
pub struct HttpOutbound {
    endpoint: String,
    token: Option<String>,
    client: Client,
}

impl HttpOutbound {
    /// Create a new relay adapter.
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            endpoint: endpoint.into(),
            token,
            client,
        }
    }

    async fn post(&self, message: &OutgoingMessage) -> ChannelResult<String> {
        if message.to.is_empty() {
            return Err(ChannelError::InvalidMessage("recipient is empty".into()));
        }

        let body = match &message.content {
            OutgoingContent::Text { text } => serde_json::json!({
                "to": message.to,
                "type": "text",
                "text": text,
            }),
            OutgoingContent::Media { url, caption } => serde_json::json!({
                "to": message.to,
                "type": "media",
                "url": url,
                "caption": caption,
            }),
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("relay unreachable: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed(format!(
                "relay error ({status}): {error}"
            )));
        }

        let result: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
        let message_id = result
            .get("id")
            .and_then(|id| id.as_str())
            .unwrap_or("unknown")
            .to_string();

        tracing::debug!(to = %message.to, message_id = %message_id, "Relay accepted message");
        Ok(message_id)
    }
}

#[async_trait]
impl Outbound for HttpOutbound {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send_text(&self, to: &str, text: &str) -> ChannelResult<String> {
        self.post(&OutgoingMessage::text(to, text)).await
    }

    async fn send_media(&self, to: &str, url: &str, caption: Option<&str>) -> ChannelResult<String> {
        self.post(&OutgoingMessage::media(to, url, caption.map(String::from)))
            .await
    }
}

// ============================================================================
// MemoryOutbound
// ============================================================================

/// Records every message instead of delivering it.
#[derive(Default)]
pub struct MemoryOutbound {
    sent: Arc<RwLock<Vec<OutgoingMessage>>>,
    failing: AtomicBool,
}

impl MemoryOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All recorded messages, in send order.
    pub async fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.read().await.clone()
    }

    /// Recorded messages addressed to one contact.
    pub async fn sent_to(&self, to: &str) -> Vec<OutgoingMessage> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|m| m.to == to)
            .cloned()
            .collect()
    }

    async fn record(&self, message: OutgoingMessage) -> ChannelResult<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::NotReady);
        }
        let mut sent = self.sent.write().await;
        sent.push(message);
        tracing::info!(count = sent.len(), "Recorded outbound message (dry run)");
        Ok(format!("memory-{}", sent.len()))
    }
}

#[async_trait]
impl Outbound for MemoryOutbound {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn send_text(&self, to: &str, text: &str) -> ChannelResult<String> {
        self.record(OutgoingMessage::text(to, text)).await
    }

    async fn send_media(&self, to: &str, url: &str, caption: Option<&str>) -> ChannelResult<String> {
        self.record(OutgoingMessage::media(to, url, caption.map(String::from)))
            .await
    }
}

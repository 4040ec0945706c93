//! Outbound adapter trait.

use async_trait::async_trait;
use chatflow_common::Error;

/// Result type for outbound operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Outbound adapter error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Channel not ready")]
    NotReady,
}

impl From<ChannelError> for Error {
    fn from(err: ChannelError) -> Self {
        Error::Adapter(err.to_string())
    }
}

/// Sends replies to contacts through the messaging provider.
///
/// Failures are returned to the caller; the step that sent the message
/// decides what the failure means for its flow.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Adapter name, for logs.
    fn name(&self) -> &'static str;

    /// Send a text message. Returns the provider message id.
    async fn send_text(&self, to: &str, text: &str) -> ChannelResult<String>;

    /// Send a media message by URL. Returns the provider message id.
    async fn send_media(&self, to: &str, url: &str, caption: Option<&str>) -> ChannelResult<String>;
}

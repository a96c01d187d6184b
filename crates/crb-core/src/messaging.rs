use async_trait::async_trait;

use crate::{domain::ChatScope, Result};

/// Hexagonal port for outbound messaging.
///
/// The Telegram adapter implements this; core code (delivery, handlers) only
/// talks to the trait so tests can substitute a recording fake.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a message with HTML formatting. Fails if the transport rejects
    /// the markup or the payload.
    async fn send_html(&self, chat: ChatScope, html: &str) -> Result<()>;

    /// Send a message as plain text, no parse mode.
    async fn send_plain(&self, chat: ChatScope, text: &str) -> Result<()>;

    /// Best-effort typing indicator. Errors are the caller's to ignore.
    async fn send_typing(&self, chat: ChatScope) -> Result<()>;
}

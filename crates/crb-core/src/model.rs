//! Provider-agnostic model client port.
//!
//! Handlers build a [`ChatRequest`] from stored history plus the incoming
//! message and hand it to whichever [`LlmClient`] was wired in at startup.
//! Provider quirks (header names, payload shapes) stay in the adapter crate.

use async_trait::async_trait;

use crate::{domain::Role, Result};

/// One message in the request transcript.
#[derive(Clone, Debug)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
}

impl Turn {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: TurnContent::Text(content.into()),
        }
    }
}

/// Content of a turn. History replays are always text; the newest user turn
/// may carry an image alongside its text.
#[derive(Clone, Debug)]
pub enum TurnContent {
    Text(String),
    ImageText {
        media_type: String,
        base64_data: String,
        text: String,
    },
}

#[derive(Clone, Debug)]
pub struct ChatRequest {
    /// Transcript oldest-first, ending with the newest user turn.
    pub turns: Vec<Turn>,
    /// Optional system prompt applied to the whole exchange.
    pub system: Option<String>,
}

/// A completed model exchange: the reply text plus the token counts the
/// usage ledger needs.
#[derive(Clone, Debug)]
pub struct ChatReply {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Model client interface used by the handlers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// The model identifier requests are billed against.
    fn model(&self) -> &str;

    async fn chat(&self, req: ChatRequest) -> Result<ChatReply>;
}

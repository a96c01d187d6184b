//! Anthropic Messages API adapter.
//!
//! Implements the core [`LlmClient`] port over `POST /v1/messages`. All
//! provider quirks (header names, content block shapes, usage field paths)
//! stay in this crate.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crb_core::{
    model::{ChatReply, ChatRequest, LlmClient, Turn, TurnContent},
    Error, Result,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    http: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        max_tokens: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::ModelApi(format!("http client build: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
            max_tokens,
            http,
        })
    }
}

/// Convert the transcript to Anthropic message objects. Text turns become
/// string content; an image turn becomes a content array with the image block
/// first and its text after, which is the ordering the API documents.
fn to_api_messages(turns: &[Turn]) -> Vec<serde_json::Value> {
    turns
        .iter()
        .map(|turn| {
            let role = turn.role.as_str();
            match &turn.content {
                TurnContent::Text(text) => {
                    serde_json::json!({"role": role, "content": text})
                }
                TurnContent::ImageText {
                    media_type,
                    base64_data,
                    text,
                } => {
                    serde_json::json!({
                        "role": role,
                        "content": [
                            {
                                "type": "image",
                                "source": {
                                    "type": "base64",
                                    "media_type": media_type,
                                    "data": base64_data,
                                }
                            },
                            {"type": "text", "text": text},
                        ]
                    })
                }
            }
        })
        .collect()
}

/// Concatenate the text blocks of a response body.
fn text_from_content(resp: &serde_json::Value) -> String {
    resp["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| {
                    if b["type"].as_str() == Some("text") {
                        b["text"].as_str()
                    } else {
                        None
                    }
                })
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn truncate_body(body: &str) -> String {
    body.chars().take(300).collect()
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatReply> {
        let messages = to_api_messages(&req.turns);

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": messages,
        });
        if let Some(system) = &req.system {
            body["system"] = serde_json::Value::String(system.clone());
        }

        debug!(
            model = %self.model,
            messages = req.turns.len(),
            has_system = req.system.is_some(),
            "anthropic chat request"
        );

        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ModelApi(format!("request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            warn!(status = %status, "anthropic api error");
            return Err(Error::ModelApi(format!(
                "http {status}: {}",
                truncate_body(&body_text)
            )));
        }

        let resp: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::ModelApi(format!("response decode error: {e}")))?;

        let text = text_from_content(&resp);
        if text.trim().is_empty() {
            return Err(Error::ModelApi("empty completion".to_string()));
        }

        Ok(ChatReply {
            text,
            input_tokens: resp["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: resp["usage"]["output_tokens"].as_u64().unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crb_core::domain::Role;

    #[test]
    fn text_turns_become_string_content() {
        let turns = vec![
            Turn::text(Role::User, "hi"),
            Turn::text(Role::Assistant, "hello"),
            Turn::text(Role::User, "how are you?"),
        ];
        let msgs = to_api_messages(&turns);

        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0]["role"], "user");
        assert_eq!(msgs[0]["content"], "hi");
        assert_eq!(msgs[1]["role"], "assistant");
        assert_eq!(msgs[2]["content"], "how are you?");
    }

    #[test]
    fn image_turn_becomes_block_array() {
        let turns = vec![Turn {
            role: Role::User,
            content: TurnContent::ImageText {
                media_type: "image/jpeg".to_string(),
                base64_data: "aGVsbG8=".to_string(),
                text: "what is this?".to_string(),
            },
        }];
        let msgs = to_api_messages(&turns);

        let blocks = msgs[0]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["type"], "image");
        assert_eq!(blocks[0]["source"]["type"], "base64");
        assert_eq!(blocks[0]["source"]["media_type"], "image/jpeg");
        assert_eq!(blocks[0]["source"]["data"], "aGVsbG8=");
        assert_eq!(blocks[1]["type"], "text");
        assert_eq!(blocks[1]["text"], "what is this?");
    }

    #[test]
    fn text_blocks_are_concatenated() {
        let resp = serde_json::json!({
            "content": [
                {"type": "text", "text": "part one"},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": " part two"},
            ]
        });
        assert_eq!(text_from_content(&resp), "part one part two");
    }

    #[test]
    fn missing_content_is_empty() {
        assert_eq!(text_from_content(&serde_json::json!({})), "");
    }
}

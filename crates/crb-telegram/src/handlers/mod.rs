//! Telegram update handlers.
//!
//! Each handler validates access, builds a model request from stored history
//! plus the incoming message, and hands the reply to the delivery layer.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use tracing::error;

use crb_core::{
    domain::{ChatScope, UserId},
    formatting::escape_html,
};

use crate::router::AppState;

mod admin;
mod commands;
mod document;
mod photo;
mod prompt;
mod text;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);
    let chat = ChatScope(msg.chat.id.0);

    // Register / refresh the sender before any gate. Never touches flags on
    // an existing row. A failure here must not drop the message, so it is
    // logged and processing continues.
    if let Err(e) = state.store.upsert_user(
        user_id,
        user.username.as_deref(),
        Some(user.first_name.as_str()),
        user.last_name.as_deref(),
        false,
    ) {
        error!(user = user_id.0, op = "upsert_user", %e, "storage operation failed");
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(bot, msg, state).await;
        }
    }

    // In groups, stay silent unless explicitly addressed.
    if !is_addressed(&msg, &state.bot_username, state.bot_user_id) {
        return Ok(());
    }

    if !state.store.is_authorized(user_id).unwrap_or(false) {
        let denial = format!(
            "❌ You don't have access to this bot.\nYour ID: <code>{}</code>\nSend this ID to the administrator.",
            user_id.0
        );
        let _ = state.messenger.send_html(chat, &denial).await;
        return Ok(());
    }

    let chat_id = msg.chat.id.0;
    if msg.text().is_some() {
        let _guard = state.chat_locks.lock_chat(chat_id).await;
        return text::handle_text(msg, state).await;
    }
    if msg.photo().is_some() {
        let _guard = state.chat_locks.lock_chat(chat_id).await;
        return photo::handle_photo(bot, msg, state).await;
    }
    if msg.document().is_some() {
        let _guard = state.chat_locks.lock_chat(chat_id).await;
        return document::handle_document(bot, msg, state).await;
    }

    Ok(())
}

/// In private chats every message is addressed to the bot. In groups the
/// message counts only when it replies to the bot or mentions @botusername in
/// its text or caption.
fn is_addressed(msg: &Message, bot_username: &str, bot_user_id: i64) -> bool {
    if msg.chat.is_private() {
        return true;
    }

    if let Some(reply) = msg.reply_to_message() {
        if let Some(author) = reply.from() {
            if author.id.0 as i64 == bot_user_id {
                return true;
            }
        }
    }

    msg.text().map(|t| mentions(t, bot_username)).unwrap_or(false)
        || msg
            .caption()
            .map(|c| mentions(c, bot_username))
            .unwrap_or(false)
}

/// Case-insensitive `@botusername` match on a username boundary, so a mention
/// of `@botusername2` does not count.
fn mentions(text: &str, bot_username: &str) -> bool {
    let haystack = text.to_lowercase();
    let needle = format!("@{}", bot_username.to_lowercase());

    let mut start = 0;
    while let Some(rel) = haystack[start..].find(&needle) {
        let end = start + rel + needle.len();
        let at_boundary = haystack[end..]
            .chars()
            .next()
            .map(|c| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(true);
        if at_boundary {
            return true;
        }
        start = end;
    }
    false
}

/// Strip an @botusername mention so the model never sees it.
fn strip_mention(text: &str, state: &AppState) -> String {
    let mention = format!("@{}", state.bot_username);
    text.replace(&mention, "").trim().to_string()
}

/// First part of an inbound message for error logs, so a failed exchange
/// still leaves the content in the log.
fn log_snippet(s: &str) -> String {
    const MAX_CHARS: usize = 200;
    if s.chars().count() <= MAX_CHARS {
        return s.to_string();
    }
    format!("{}...", s.chars().take(MAX_CHARS).collect::<String>())
}

async fn send_error_notice(state: &AppState, chat: ChatScope, err: &crb_core::Error) {
    let notice = format!(
        "❌ Something went wrong while processing your message:\n{}",
        escape_html(&err.to_string().chars().take(200).collect::<String>())
    );
    let _ = state.messenger.send_html(chat, &notice).await;
}

/// Storage failure during a command: log with user id + operation, then tell
/// the user.
async fn report_storage_error(
    state: &AppState,
    chat: ChatScope,
    user_id: UserId,
    op: &str,
    err: &crb_core::Error,
) {
    error!(user = user_id.0, op, %err, "storage operation failed");
    send_error_notice(state, chat, err).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "relay_bot";
    const BOT_ID: i64 = 999;

    fn message(json: serde_json::Value) -> Message {
        serde_json::from_value(json).unwrap()
    }

    fn group_text(text: &str) -> Message {
        message(serde_json::json!({
            "message_id": 2,
            "date": 0,
            "chat": {"id": -100, "type": "group", "title": "g"},
            "from": {"id": 7, "is_bot": false, "first_name": "U"},
            "text": text,
        }))
    }

    #[test]
    fn mention_matching_is_case_insensitive_and_bounded() {
        assert!(mentions("hello @relay_bot", BOT));
        assert!(mentions("@Relay_Bot what's up", BOT));
        assert!(!mentions("hello there", BOT));
        // A longer username containing ours is a different bot.
        assert!(!mentions("hello @relay_bot2", BOT));
        assert!(mentions("@relay_bot, hi", BOT));
    }

    #[test]
    fn private_chats_are_always_addressed() {
        let msg = message(serde_json::json!({
            "message_id": 1,
            "date": 0,
            "chat": {"id": 7, "type": "private", "first_name": "U"},
            "from": {"id": 7, "is_bot": false, "first_name": "U"},
            "text": "hello",
        }));
        assert!(is_addressed(&msg, BOT, BOT_ID));
    }

    #[test]
    fn group_messages_need_a_mention() {
        assert!(!is_addressed(&group_text("hello everyone"), BOT, BOT_ID));
        assert!(is_addressed(&group_text("hello @relay_bot"), BOT, BOT_ID));
        assert!(is_addressed(&group_text("hey @RELAY_BOT?"), BOT, BOT_ID));
    }

    #[test]
    fn replying_to_the_bot_counts_as_addressed() {
        let msg = message(serde_json::json!({
            "message_id": 3,
            "date": 0,
            "chat": {"id": -100, "type": "group", "title": "g"},
            "from": {"id": 7, "is_bot": false, "first_name": "U"},
            "text": "and what about this?",
            "reply_to_message": {
                "message_id": 2,
                "date": 0,
                "chat": {"id": -100, "type": "group", "title": "g"},
                "from": {"id": BOT_ID, "is_bot": true, "first_name": "Bot", "username": BOT},
                "text": "earlier reply",
            },
        }));
        assert!(is_addressed(&msg, BOT, BOT_ID));

        let msg = message(serde_json::json!({
            "message_id": 4,
            "date": 0,
            "chat": {"id": -100, "type": "group", "title": "g"},
            "from": {"id": 7, "is_bot": false, "first_name": "U"},
            "text": "replying to a human",
            "reply_to_message": {
                "message_id": 2,
                "date": 0,
                "chat": {"id": -100, "type": "group", "title": "g"},
                "from": {"id": 8, "is_bot": false, "first_name": "V"},
                "text": "some message",
            },
        }));
        assert!(!is_addressed(&msg, BOT, BOT_ID));
    }

    #[test]
    fn caption_mentions_are_addressed() {
        let msg = message(serde_json::json!({
            "message_id": 5,
            "date": 0,
            "chat": {"id": -100, "type": "group", "title": "g"},
            "from": {"id": 7, "is_bot": false, "first_name": "U"},
            "photo": [{
                "file_id": "f",
                "file_unique_id": "u",
                "width": 1,
                "height": 1,
                "file_size": 1,
            }],
            "caption": "@relay_bot what is this?",
        }));
        assert!(is_addressed(&msg, BOT, BOT_ID));
    }

    #[test]
    fn log_snippet_truncates_long_content() {
        assert_eq!(log_snippet("short"), "short");
        let long = "x".repeat(500);
        let snippet = log_snippet(&long);
        assert_eq!(snippet.chars().count(), 203);
        assert!(snippet.ends_with("..."));
    }
}

use std::sync::Arc;

use teloxide::prelude::*;

use crb_core::{
    domain::{ChatScope, UserId},
    formatting::escape_html,
};

use crate::handlers::{admin, report_storage_error};
use crate::router::AppState;

/// Telegram may send `/cmd@botname arg1 ...`; the `@botname` suffix names
/// which bot a group command is addressed to. The suffix is returned so the
/// dispatcher can match it against its own username.
pub fn parse_command(text: &str) -> (String, Option<String>, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let mut pieces = first.trim_start_matches('/').splitn(2, '@');
    let cmd = pieces.next().unwrap_or("").to_lowercase();
    let target = pieces
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    (cmd, target, rest)
}

/// A bare command is ours; a suffixed command only when the suffix matches
/// our username (Telegram usernames are case-insensitive).
pub fn is_for_this_bot(target: Option<&str>, bot_username: &str) -> bool {
    match target {
        None => true,
        Some(t) => t.eq_ignore_ascii_case(bot_username),
    }
}

/// Group digits in threes, matching how the stats screens have always shown
/// token counts.
pub fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub async fn handle_command(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let chat = ChatScope(msg.chat.id.0);
    let (cmd, target, args) = parse_command(text);

    // `/start@some_other_bot` in a group is not ours to answer.
    if !is_for_this_bot(target.as_deref(), &state.bot_username) {
        return Ok(());
    }

    match cmd.as_str() {
        "start" => cmd_start(&state, chat, user_id, &user.first_name).await,
        "help" => cmd_help(&state, chat, user_id).await,
        "clear" => cmd_clear(&state, chat, user_id).await,
        "stats" => cmd_stats(&state, chat, user_id).await,
        "authorize" | "deauthorize" | "users" | "totalstats" | "setprompt" | "showprompt" => {
            admin::handle_admin_command(&state, chat, user_id, &cmd, &args).await
        }
        _ => {}
    }

    Ok(())
}

async fn cmd_start(state: &AppState, chat: ChatScope, user_id: UserId, first_name: &str) {
    let name = escape_html(first_name);

    if !state.store.is_authorized(user_id).unwrap_or(false) {
        let msg = format!(
            "👋 Hi, {name}!\n\n\
             ❌ You don't have access to this bot yet.\n\
             Your ID: <code>{}</code>\n\n\
             Send this ID to the administrator to get access.",
            user_id.0
        );
        let _ = state.messenger.send_html(chat, &msg).await;
        return;
    }

    let msg = format!(
        "👋 Hi, {name}!\n\n\
         I'm a bot backed by Claude. You can:\n\
         • Ask me anything\n\
         • Send pictures for analysis\n\
         • Send text files\n\n\
         Commands:\n\
         /clear - Clear the conversation history\n\
         /help - Show help\n\
         /stats - Show your usage statistics"
    );
    let _ = state.messenger.send_html(chat, &msg).await;
}

async fn cmd_help(state: &AppState, chat: ChatScope, user_id: UserId) {
    if !state.store.is_authorized(user_id).unwrap_or(false) {
        let _ = state
            .messenger
            .send_plain(chat, "❌ You don't have access to this bot.")
            .await;
        return;
    }

    let mut help = format!(
        "🤖 <b>Bot help</b>\n\n\
         <b>Commands:</b>\n\
         /start - Start using the bot\n\
         /help - Show this help\n\
         /clear - Clear the conversation history\n\
         /stats - Show usage statistics\n\n\
         <b>What I can do:</b>\n\
         • Send a text message and get a Claude reply\n\
         • Send a picture with a caption and Claude will analyze it\n\
         • Send a text file and Claude will read it\n\n\
         <b>Notes:</b>\n\
         • The bot remembers the conversation context\n\
         • Model in use: {}",
        escape_html(state.llm.model())
    );

    if state.store.is_admin(user_id).unwrap_or(false) {
        help.push_str(
            "\n\n<b>Admin commands:</b>\n\
             /authorize &lt;user_id&gt; - Grant access\n\
             /deauthorize &lt;user_id&gt; - Revoke access\n\
             /users - List all users\n\
             /totalstats - Overall statistics\n\
             /setprompt &lt;text&gt; - Set the system prompt\n\
             /showprompt - Show the current system prompt",
        );
    }

    let _ = state.messenger.send_html(chat, &help).await;
}

async fn cmd_clear(state: &AppState, chat: ChatScope, user_id: UserId) {
    if !state.store.is_authorized(user_id).unwrap_or(false) {
        let _ = state
            .messenger
            .send_plain(chat, "❌ You don't have access to this bot.")
            .await;
        return;
    }

    match state.store.clear_turns(user_id, chat) {
        Ok(()) => {
            let _ = state
                .messenger
                .send_plain(chat, "🗑️ Conversation history cleared in this chat.")
                .await;
        }
        Err(e) => report_storage_error(state, chat, user_id, "clear_turns", &e).await,
    }
}

async fn cmd_stats(state: &AppState, chat: ChatScope, user_id: UserId) {
    if !state.store.is_authorized(user_id).unwrap_or(false) {
        let _ = state
            .messenger
            .send_plain(chat, "❌ You don't have access to this bot.")
            .await;
        return;
    }

    let usage = match state.store.user_usage(user_id) {
        Ok(u) => u,
        Err(e) => {
            report_storage_error(state, chat, user_id, "user_usage", &e).await;
            return;
        }
    };

    let msg = format!(
        "📊 <b>Your statistics</b>\n\n\
         Requests: {}\n\
         Input tokens: {}\n\
         Output tokens: {}\n\
         Total cost: ${:.4}",
        usage.total_requests,
        format_thousands(usage.total_input_tokens),
        format_thousands(usage.total_output_tokens),
        usage.total_cost
    );
    let _ = state.messenger.send_html(chat, &msg).await;
}

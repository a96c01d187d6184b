//! Admin commands: access management, fleet statistics, system prompt.

use tracing::info;

use crb_core::{
    domain::{ChatScope, UserId},
    formatting::escape_html,
};

use crate::handlers::{commands::format_thousands, report_storage_error};
use crate::router::AppState;

pub async fn handle_admin_command(
    state: &AppState,
    chat: ChatScope,
    user_id: UserId,
    cmd: &str,
    args: &str,
) {
    if !state.store.is_admin(user_id).unwrap_or(false) {
        let _ = state
            .messenger
            .send_plain(chat, "❌ You don't have admin rights.")
            .await;
        return;
    }

    match cmd {
        "authorize" => cmd_authorize(state, chat, user_id, args).await,
        "deauthorize" => cmd_deauthorize(state, chat, user_id, args).await,
        "users" => cmd_users(state, chat, user_id).await,
        "totalstats" => cmd_totalstats(state, chat, user_id).await,
        "setprompt" => cmd_setprompt(state, chat, user_id, args).await,
        "showprompt" => cmd_showprompt(state, chat, user_id).await,
        _ => {}
    }
}

fn parse_target(args: &str) -> Option<UserId> {
    args.trim().parse::<i64>().ok().map(UserId)
}

async fn cmd_authorize(state: &AppState, chat: ChatScope, admin: UserId, args: &str) {
    if args.trim().is_empty() {
        let _ = state
            .messenger
            .send_html(
                chat,
                "❌ Usage: <code>/authorize &lt;user_id&gt;</code>\nExample: <code>/authorize 123456789</code>",
            )
            .await;
        return;
    }
    let Some(target) = parse_target(args) else {
        let _ = state.messenger.send_plain(chat, "❌ Invalid user ID.").await;
        return;
    };

    // The target has to exist: they register themselves via /start.
    match state.store.user_exists(target) {
        Ok(false) => {
            let msg = format!(
                "⚠️ User <code>{}</code> is not in the database.\nThey have to message the bot with /start first.",
                target.0
            );
            let _ = state.messenger.send_html(chat, &msg).await;
            return;
        }
        Ok(true) => {}
        Err(e) => {
            report_storage_error(state, chat, admin, "user_exists", &e).await;
            return;
        }
    }

    match state.store.authorize(target) {
        Ok(()) => {
            info!(admin = admin.0, target = target.0, "user authorized");
            let _ = state
                .messenger
                .send_html(chat, &format!("✅ User <code>{}</code> authorized.", target.0))
                .await;
        }
        Err(e) => report_storage_error(state, chat, admin, "authorize", &e).await,
    }
}

async fn cmd_deauthorize(state: &AppState, chat: ChatScope, admin: UserId, args: &str) {
    if args.trim().is_empty() {
        let _ = state
            .messenger
            .send_html(
                chat,
                "❌ Usage: <code>/deauthorize &lt;user_id&gt;</code>\nExample: <code>/deauthorize 123456789</code>",
            )
            .await;
        return;
    }
    let Some(target) = parse_target(args) else {
        let _ = state.messenger.send_plain(chat, "❌ Invalid user ID.").await;
        return;
    };

    // The root admin stays authorized no matter who asks.
    if target.0 == state.cfg.admin_user_id {
        let _ = state
            .messenger
            .send_plain(chat, "❌ The root administrator cannot be deauthorized.")
            .await;
        return;
    }

    match state.store.deauthorize(target) {
        Ok(()) => {
            info!(admin = admin.0, target = target.0, "user deauthorized");
            let _ = state
                .messenger
                .send_html(
                    chat,
                    &format!("✅ User <code>{}</code> deauthorized.", target.0),
                )
                .await;
        }
        Err(e) => report_storage_error(state, chat, admin, "deauthorize", &e).await,
    }
}

async fn cmd_users(state: &AppState, chat: ChatScope, admin: UserId) {
    let users = match state.store.list_users() {
        Ok(u) => u,
        Err(e) => {
            report_storage_error(state, chat, admin, "list_users", &e).await;
            return;
        }
    };

    let mut text = "👥 <b>All users</b>\n\n".to_string();

    let authorized: Vec<_> = users.iter().filter(|u| u.is_authorized).collect();
    let pending: Vec<_> = users.iter().filter(|u| !u.is_authorized).collect();

    if !authorized.is_empty() {
        text.push_str("<b>Authorized:</b>\n");
        for u in &authorized {
            let name = escape_html(u.display_name());
            let username = u
                .username
                .as_deref()
                .map(|n| format!(" @{}", escape_html(n)))
                .unwrap_or_default();
            let badge = if u.is_admin { " 👑" } else { "" };
            text.push_str(&format!(
                "• {name}{username}{badge}\n  ID: <code>{}</code>\n",
                u.user_id.0
            ));
        }
        text.push('\n');
    }

    if !pending.is_empty() {
        text.push_str("<b>Waiting for authorization:</b>\n");
        for u in &pending {
            let name = escape_html(u.display_name());
            let username = u
                .username
                .as_deref()
                .map(|n| format!(" @{}", escape_html(n)))
                .unwrap_or_default();
            text.push_str(&format!(
                "• {name}{username}\n  ID: <code>{}</code>\n",
                u.user_id.0
            ));
        }
    }

    text.push_str(&format!("\n<b>Total users:</b> {}", users.len()));

    let _ = state.messenger.send_html(chat, &text).await;
}

async fn cmd_totalstats(state: &AppState, chat: ChatScope, admin: UserId) {
    let stats = match state.store.total_usage() {
        Ok(s) => s,
        Err(e) => {
            report_storage_error(state, chat, admin, "total_usage", &e).await;
            return;
        }
    };

    let msg = format!(
        "📊 <b>Overall usage statistics</b>\n\n\
         Total requests: {}\n\
         Input tokens: {}\n\
         Output tokens: {}\n\
         Total tokens: {}\n\n\
         💰 <b>Total cost:</b> ${:.4}\n\n\
         Model in use: <code>{}</code>",
        format_thousands(stats.total_requests),
        format_thousands(stats.total_input_tokens),
        format_thousands(stats.total_output_tokens),
        format_thousands(stats.total_input_tokens + stats.total_output_tokens),
        stats.total_cost,
        escape_html(state.llm.model())
    );
    let _ = state.messenger.send_html(chat, &msg).await;
}

async fn cmd_setprompt(state: &AppState, chat: ChatScope, admin: UserId, args: &str) {
    let prompt = args.trim();
    if prompt.is_empty() {
        let _ = state
            .messenger
            .send_html(chat, "❌ Usage: <code>/setprompt &lt;text&gt;</code>")
            .await;
        return;
    }

    match state.store.set_setting("system_prompt", prompt) {
        Ok(()) => {
            let _ = state
                .messenger
                .send_html(
                    chat,
                    &format!("✅ System prompt set:\n<code>{}</code>", escape_html(prompt)),
                )
                .await;
        }
        Err(e) => report_storage_error(state, chat, admin, "set_setting", &e).await,
    }
}

async fn cmd_showprompt(state: &AppState, chat: ChatScope, admin: UserId) {
    match state.store.get_setting("system_prompt") {
        Ok(Some(prompt)) => {
            let _ = state
                .messenger
                .send_html(
                    chat,
                    &format!("📝 Current system prompt:\n<code>{}</code>", escape_html(&prompt)),
                )
                .await;
        }
        Ok(None) => {
            let _ = state
                .messenger
                .send_plain(chat, "📝 No system prompt is set.")
                .await;
        }
        Err(e) => report_storage_error(state, chat, admin, "get_setting", &e).await,
    }
}

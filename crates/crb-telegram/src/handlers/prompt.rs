//! Shared model exchange flow for text, photo and document messages.

use std::sync::Arc;

use tracing::{info, warn};

use crb_core::{
    delivery::deliver_reply,
    domain::{ChatScope, Role, UserId},
    model::{ChatRequest, Turn, TurnContent},
    Result,
};

use crate::router::AppState;

pub struct ExchangeContext {
    pub state: Arc<AppState>,
    pub chat: ChatScope,
    pub user: UserId,
}

/// Run one request/reply exchange: replay history, call the model, persist
/// both turns plus the usage row, then deliver the reply in chunks.
///
/// Nothing is persisted when the model call fails, so a failed exchange
/// leaves history exactly as it was.
pub async fn run_exchange(
    ctx: &ExchangeContext,
    label: &str,
    content: TurnContent,
    stored_user_entry: &str,
    history_limit: usize,
) -> Result<()> {
    let state = &ctx.state;

    if let Err(e) = state.messenger.send_typing(ctx.chat).await {
        warn!(chat = ctx.chat.0, %e, "typing indicator failed");
    }

    let history = state.store.recent_turns(ctx.user, ctx.chat, history_limit)?;
    let mut turns: Vec<Turn> = history
        .into_iter()
        .map(|t| Turn::text(t.role, t.content))
        .collect();
    turns.push(Turn {
        role: Role::User,
        content,
    });

    let system = state.store.get_setting("system_prompt")?;

    let reply = state.llm.chat(ChatRequest { turns, system }).await?;

    state
        .store
        .append_turn(ctx.user, ctx.chat, Role::User, stored_user_entry)?;
    state
        .store
        .append_turn(ctx.user, ctx.chat, Role::Assistant, &reply.text)?;
    let cost = state.store.log_usage(
        ctx.user,
        state.llm.model(),
        reply.input_tokens,
        reply.output_tokens,
    )?;

    info!(
        user = ctx.user.0,
        kind = label,
        input_tokens = reply.input_tokens,
        output_tokens = reply.output_tokens,
        cost = format!("{cost:.4}"),
        "exchange complete"
    );

    deliver_reply(
        state.messenger.as_ref(),
        ctx.chat,
        &reply.text,
        state.cfg.telegram_message_limit,
    )
    .await?;

    Ok(())
}

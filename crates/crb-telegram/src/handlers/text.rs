use std::sync::Arc;

use teloxide::prelude::*;

use tracing::error;

use crb_core::{
    domain::{ChatScope, UserId},
    model::TurnContent,
};

use crate::handlers::{
    log_snippet,
    prompt::{run_exchange, ExchangeContext},
    send_error_notice, strip_mention,
};
use crate::router::AppState;

pub async fn handle_text(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(raw) = msg.text() else {
        return Ok(());
    };

    let text = strip_mention(raw, &state);
    if text.is_empty() {
        return Ok(());
    }

    let ctx = ExchangeContext {
        state: state.clone(),
        chat: ChatScope(msg.chat.id.0),
        user: UserId(user.id.0 as i64),
    };

    let history_limit = state.cfg.history_limit;
    if let Err(e) = run_exchange(
        &ctx,
        "TEXT",
        TurnContent::Text(text.clone()),
        &text,
        history_limit,
    )
    .await
    {
        error!(user = ctx.user.0, %e, message = %log_snippet(&text), "text exchange failed");
        send_error_notice(&state, ctx.chat, &e).await;
    }

    Ok(())
}

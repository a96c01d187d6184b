use std::sync::Arc;

use teloxide::prelude::*;

use tracing::error;

use crb_core::{
    domain::{ChatScope, UserId},
    model::TurnContent,
};

use crate::handlers::{
    log_snippet,
    photo::download_file_bytes,
    prompt::{run_exchange, ExchangeContext},
    send_error_notice, strip_mention,
};
use crate::router::AppState;

const DEFAULT_DOCUMENT_PROMPT: &str = "Analyze this document";
const MAX_DOCUMENT_BYTES: u32 = 1_000_000;

/// Documents get a smaller history window since the file content itself takes
/// a large share of the context.
const DOCUMENT_HISTORY_LIMIT: usize = 5;

pub async fn handle_document(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(document) = msg.document() else {
        return Ok(());
    };

    let chat = ChatScope(msg.chat.id.0);

    let is_text = document
        .mime_type
        .as_ref()
        .map(|m| m.essence_str().starts_with("text/"))
        .unwrap_or(false);
    if !is_text {
        let _ = state
            .messenger
            .send_plain(
                chat,
                "❌ Only text files are supported (.txt, .py, .js, .json, .md, ...).",
            )
            .await;
        return Ok(());
    }

    if document.file.size > MAX_DOCUMENT_BYTES {
        let _ = state
            .messenger
            .send_plain(chat, "❌ File is too large. Maximum size: 1 MB.")
            .await;
        return Ok(());
    }

    let ctx = ExchangeContext {
        state: state.clone(),
        chat,
        user: UserId(user.id.0 as i64),
    };

    let bytes = match download_file_bytes(&bot, &document.file.id).await {
        Ok(b) => b,
        Err(e) => {
            error!(user = ctx.user.0, %e, "document download failed");
            send_error_notice(&state, chat, &e).await;
            return Ok(());
        }
    };
    let doc_text = String::from_utf8_lossy(&bytes).to_string();

    let caption = msg
        .caption()
        .map(|c| strip_mention(c, &state))
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_DOCUMENT_PROMPT.to_string());

    // The file content rides along in the prompt; only the caption is what
    // the user "said", so only that (plus the file name) enters history.
    let prompt = format!("Document content:\n\n{doc_text}\n\n{caption}");
    let file_name = document.file_name.as_deref().unwrap_or("file");
    let stored_entry = format!("[Document: {file_name}] {caption}");

    if let Err(e) = run_exchange(
        &ctx,
        "DOCUMENT",
        TurnContent::Text(prompt),
        &stored_entry,
        DOCUMENT_HISTORY_LIMIT,
    )
    .await
    {
        error!(user = ctx.user.0, %e, message = %log_snippet(&stored_entry), "document exchange failed");
        send_error_notice(&state, chat, &e).await;
    }

    Ok(())
}

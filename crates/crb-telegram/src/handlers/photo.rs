use std::sync::Arc;

use base64::Engine;

use teloxide::{net::Download, prelude::*};

use tracing::error;

use crb_core::{
    domain::{ChatScope, UserId},
    model::TurnContent,
    Error,
};

use crate::handlers::{
    log_snippet,
    prompt::{run_exchange, ExchangeContext},
    send_error_notice, strip_mention,
};
use crate::router::AppState;

const DEFAULT_PHOTO_PROMPT: &str = "What is shown in this picture?";

pub async fn handle_photo(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(photos) = msg.photo() else {
        return Ok(());
    };

    let ctx = ExchangeContext {
        state: state.clone(),
        chat: ChatScope(msg.chat.id.0),
        user: UserId(user.id.0 as i64),
    };

    let caption = msg
        .caption()
        .map(|c| strip_mention(c, &state))
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_PHOTO_PROMPT.to_string());

    // Telegram sends the same photo in several resolutions; the last is the
    // largest.
    let bytes = match photos.last() {
        Some(best) => download_file_bytes(&bot, &best.file.id).await,
        None => Err(Error::Delivery("photo without sizes".to_string())),
    };
    let bytes = match bytes {
        Ok(b) => b,
        Err(e) => {
            error!(user = ctx.user.0, %e, "photo download failed");
            send_error_notice(&state, ctx.chat, &e).await;
            return Ok(());
        }
    };

    let content = TurnContent::ImageText {
        // Telegram recompresses uploads to JPEG.
        media_type: "image/jpeg".to_string(),
        base64_data: base64::engine::general_purpose::STANDARD.encode(&bytes),
        text: caption.clone(),
    };
    let stored_entry = format!("[Image] {caption}");

    let history_limit = state.cfg.history_limit;
    if let Err(e) = run_exchange(&ctx, "PHOTO", content, &stored_entry, history_limit).await {
        error!(user = ctx.user.0, %e, message = %log_snippet(&stored_entry), "photo exchange failed");
        send_error_notice(&state, ctx.chat, &e).await;
    }

    Ok(())
}

pub(super) async fn download_file_bytes(bot: &Bot, file_id: &str) -> crb_core::Result<Vec<u8>> {
    let file = bot
        .get_file(file_id.to_string())
        .await
        .map_err(|e| Error::Delivery(format!("telegram get_file: {e}")))?;

    let mut buf = std::io::Cursor::new(Vec::new());
    bot.download_file(&file.path, &mut buf)
        .await
        .map_err(|e| Error::Delivery(format!("telegram download: {e}")))?;
    Ok(buf.into_inner())
}

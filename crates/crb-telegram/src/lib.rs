//! Telegram adapter (teloxide).
//!
//! Implements the `crb-core` Messenger port over the Telegram Bot API and
//! hosts the update router + handlers.

use async_trait::async_trait;

use teloxide::{prelude::*, types::ParseMode};

use tokio::time::sleep;

use crb_core::{domain::ChatScope, errors::Error, messaging::Messenger, Result};

pub mod handlers;
pub mod router;

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat: ChatScope) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Delivery(format!("telegram error: {e}"))
    }

    /// Retry once on a 429 RetryAfter, sleeping the interval Telegram asks
    /// for. Everything else surfaces immediately.
    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_html(&self, chat: ChatScope, html: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_message(Self::tg_chat(chat), html.to_string())
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn send_plain(&self, chat: ChatScope, text: &str) -> Result<()> {
        self.with_retry(|| self.bot.send_message(Self::tg_chat(chat), text.to_string()))
            .await?;
        Ok(())
    }

    async fn send_typing(&self, chat: ChatScope) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_chat_action(Self::tg_chat(chat), teloxide::types::ChatAction::Typing)
        })
        .await?;
        Ok(())
    }
}

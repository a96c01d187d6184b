use std::{collections::HashMap, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::{Mutex, OwnedMutexGuard};

use tracing::info;

use crb_core::{config::Config, messaging::Messenger, model::LlmClient, store::Store};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<Store>,
    pub llm: Arc<dyn LlmClient>,
    pub messenger: Arc<dyn Messenger>,
    pub chat_locks: Arc<ChatLocks>,
    /// Username of the bot account, used for the group mention gate.
    pub bot_username: String,
    pub bot_user_id: i64,
}

/// Per-chat sequencing: one model exchange at a time per chat, so replies
/// cannot interleave and history stays ordered.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub async fn run_polling(
    cfg: Arc<Config>,
    store: Arc<Store>,
    llm: Arc<dyn LlmClient>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let me = bot.get_me().await?;
    let bot_username = me.username().to_string();
    let bot_user_id = me.user.id.0 as i64;
    info!(username = %bot_username, model = %llm.model(), "bot started");

    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(bot.clone()));

    let state = Arc::new(AppState {
        cfg,
        store,
        llm,
        messenger,
        chat_locks: Arc::new(ChatLocks::default()),
        bot_username,
        bot_user_id,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}

use std::sync::Arc;

use crb_anthropic::AnthropicClient;

use crb_core::{config::Config, model::LlmClient, store::Store};

#[tokio::main]
async fn main() -> Result<(), crb_core::Error> {
    crb_core::logging::init("crb");

    let cfg = Arc::new(Config::load()?);

    let store = Arc::new(Store::open(
        &cfg.database_path,
        cfg.pricing.clone(),
        cfg.admin_user_id,
    )?);

    let llm: Arc<dyn LlmClient> = Arc::new(AnthropicClient::new(
        cfg.anthropic_api_key.clone(),
        cfg.claude_model.clone(),
        cfg.anthropic_base_url.clone(),
        cfg.max_tokens,
    )?);

    crb_telegram::router::run_polling(cfg, store, llm)
        .await
        .map_err(|e| crb_core::Error::Delivery(format!("telegram bot failed: {e}")))?;

    Ok(())
}

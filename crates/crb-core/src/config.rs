use std::{collections::HashMap, env, fs, path::Path, path::PathBuf};

use crate::{errors::Error, Result};

/// Per-million-token prices for one model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

/// Pricing table keyed by model identifier, with a fallback default for
/// unlisted models.
#[derive(Clone, Debug)]
pub struct PricingTable {
    prices: HashMap<String, ModelPrice>,
    default: ModelPrice,
}

impl PricingTable {
    pub fn new(prices: HashMap<String, ModelPrice>, default: ModelPrice) -> Self {
        Self { prices, default }
    }

    pub fn price_for(&self, model: &str) -> ModelPrice {
        self.prices.get(model).copied().unwrap_or(self.default)
    }

    /// cost = input/1e6 * price_in + output/1e6 * price_out
    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let p = self.price_for(model);
        input_tokens as f64 / 1_000_000.0 * p.input + output_tokens as f64 / 1_000_000.0 * p.output
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ModelPrice)> {
        let mut entries: Vec<_> = self.prices.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut prices = HashMap::new();
        for (model, input, output) in [
            ("claude-3-5-sonnet-20241022", 3.00, 15.00),
            ("claude-3-5-sonnet-20240620", 3.00, 15.00),
            ("claude-3-opus-20240229", 15.00, 75.00),
            ("claude-3-sonnet-20240229", 3.00, 15.00),
            ("claude-3-haiku-20240307", 0.25, 1.25),
        ] {
            prices.insert(model.to_string(), ModelPrice { input, output });
        }
        Self::new(
            prices,
            ModelPrice {
                input: 3.00,
                output: 15.00,
            },
        )
    }
}

/// Typed configuration, loaded once at startup and threaded through
/// constructors. Nothing else in the workspace reads the process environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    /// Root admin: always authorized + admin, cannot be deauthorized.
    pub admin_user_id: i64,

    pub anthropic_api_key: String,
    pub anthropic_base_url: String,
    pub claude_model: String,
    pub max_tokens: u32,

    pub database_path: PathBuf,

    /// Most recent turns replayed to the model per request.
    pub history_limit: usize,
    /// Transport hard limit for one outbound message.
    pub telegram_message_limit: usize,

    pub pricing: PricingTable,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let admin_user_id = env_i64("ADMIN_USER_ID").unwrap_or(0);
        if admin_user_id == 0 {
            return Err(Error::Config(
                "ADMIN_USER_ID environment variable is required".to_string(),
            ));
        }

        let anthropic_api_key = env_str("ANTHROPIC_API_KEY").unwrap_or_default();
        if anthropic_api_key.trim().is_empty() {
            return Err(Error::Config(
                "ANTHROPIC_API_KEY environment variable is required".to_string(),
            ));
        }

        let anthropic_base_url = env_str("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());
        let claude_model =
            env_str("CLAUDE_MODEL").unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string());
        let max_tokens = env_u32("MAX_TOKENS").unwrap_or(4096);

        let database_path =
            PathBuf::from(env_str("DATABASE_PATH").unwrap_or_else(|| "bot_data.db".to_string()));

        let history_limit = env_usize("HISTORY_LIMIT").unwrap_or(10);
        let telegram_message_limit = env_usize("TELEGRAM_MESSAGE_LIMIT").unwrap_or(4096);

        Ok(Self {
            telegram_bot_token,
            admin_user_id,
            anthropic_api_key,
            anthropic_base_url,
            claude_model,
            max_tokens,
            database_path,
            history_limit,
            telegram_message_limit,
            pricing: PricingTable::default(),
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listed_model_uses_table_price() {
        let pricing = PricingTable::default();
        let p = pricing.price_for("claude-3-haiku-20240307");
        assert_eq!(p.input, 0.25);
        assert_eq!(p.output, 1.25);
    }

    #[test]
    fn unlisted_model_falls_back_to_default() {
        let pricing = PricingTable::default();
        let p = pricing.price_for("some-future-model");
        assert_eq!(p.input, 3.00);
        assert_eq!(p.output, 15.00);
    }

    #[test]
    fn cost_is_per_million_tokens() {
        let pricing = PricingTable::default();
        let cost = pricing.cost("model-x", 1_000_000, 1_000_000);
        assert!((cost - 18.00).abs() < 1e-9);

        let cost = pricing.cost("claude-3-opus-20240229", 500_000, 0);
        assert!((cost - 7.50).abs() < 1e-9);
    }
}

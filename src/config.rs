use dotenvy::dotenv;
use eyre::{eyre, Result};
use std::{env, time::Duration};
use tracing::info;

use crate::llm::GEMINI_BASE;
use crate::wallet::FullDataLimits;

const ALCHEMY_MAINNET: &str = "https://eth-mainnet.g.alchemy.com/v2";

#[derive(Debug, Clone)]
pub struct Config {
    pub alchemy_url: String,
    pub database_url: Option<String>,
    pub google_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub host: String,
    pub port: u16,
    pub page_delay: Duration,
    pub upstream_timeout: Duration,
    pub full_limits: FullDataLimits,
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn load() -> Result<Config> {
    dotenv().ok();

    // full endpoint wins over a bare key
    let alchemy_url = non_empty("ALCHEMY_URL")
        .or_else(|| non_empty("ALCHEMY_API_KEY").map(|key| format!("{ALCHEMY_MAINNET}/{key}")))
        .ok_or_else(|| eyre!("ALCHEMY_URL or ALCHEMY_API_KEY must be set"))?;

    let defaults = FullDataLimits::default();
    let cfg = Config {
        alchemy_url,
        database_url: non_empty("DATABASE_URL"),
        google_api_key: non_empty("GOOGLE_API_KEY"),
        gemini_model: non_empty("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash-exp".to_string()),
        gemini_base_url: non_empty("GEMINI_BASE_URL").unwrap_or_else(|| GEMINI_BASE.to_string()),
        host: non_empty("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
        port: parse_or("API_PORT", 8000),
        page_delay: Duration::from_millis(parse_or("PAGE_DELAY_MS", 200)),
        upstream_timeout: Duration::from_secs(parse_or("UPSTREAM_TIMEOUT_SECS", 30)),
        full_limits: FullDataLimits {
            transfer_batches: parse_or("FULL_MAX_TRANSFER_BATCHES", defaults.transfer_batches),
            nft_batches: parse_or("FULL_MAX_NFT_BATCHES", defaults.nft_batches),
        },
    };

    // keys stay out of the log
    info!(
        host = %cfg.host,
        port = cfg.port,
        database = ?cfg.database_url,
        llm = cfg.google_api_key.is_some(),
        model = %cfg.gemini_model,
        page_delay_ms = cfg.page_delay.as_millis() as u64,
        "loaded config"
    );

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_numbers_fall_back() {
        env::set_var("CHAINQUERY_TEST_PORT", "not-a-port");
        assert_eq!(parse_or("CHAINQUERY_TEST_PORT", 8000u16), 8000);
        env::set_var("CHAINQUERY_TEST_PORT", " 9001 ");
        assert_eq!(parse_or("CHAINQUERY_TEST_PORT", 8000u16), 9001);
        assert_eq!(parse_or("CHAINQUERY_TEST_UNSET", 7usize), 7);
    }

    #[test]
    fn blank_values_count_as_unset() {
        env::set_var("CHAINQUERY_TEST_BLANK", "   ");
        assert_eq!(non_empty("CHAINQUERY_TEST_BLANK"), None);
    }
}

//! Application configuration loaded from environment variables.

use anyhow::{Context, Result};
use rust_decimal::Decimal;

use crate::models::MarginMode;

/// Process-level configuration. Per-user trade settings live in the
/// database; these are the credentials, connection targets, and the seed
/// defaults for new users.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub api_secret: String,
    pub testnet: bool,
    pub database_url: String,
    pub default_leverage: u32,
    /// Margin per trade in quote units (USDT).
    pub default_position_size: Decimal,
    pub default_sl_percentage: Decimal,
    pub default_tp_percentage: Decimal,
    pub default_margin_mode: MarginMode,
    pub auto_execute: bool,
}

impl AppConfig {
    /// Load from the environment. `BINANCE_API_KEY` and `BINANCE_API_SECRET`
    /// are required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("BINANCE_API_KEY").context("BINANCE_API_KEY not set")?;
        let api_secret =
            std::env::var("BINANCE_API_SECRET").context("BINANCE_API_SECRET not set")?;

        let testnet = env_or("BINANCE_TESTNET", "false")
            .parse::<bool>()
            .context("Invalid BINANCE_TESTNET")?;
        let database_url = env_or("DATABASE_URL", "sqlite:./sigtrader.db?mode=rwc");

        let default_leverage = env_or("DEFAULT_LEVERAGE", "20")
            .parse::<u32>()
            .context("Invalid DEFAULT_LEVERAGE")?;
        let default_position_size = env_or("DEFAULT_POSITION_SIZE", "50")
            .parse::<Decimal>()
            .context("Invalid DEFAULT_POSITION_SIZE")?;
        let default_sl_percentage = env_or("DEFAULT_SL_PERCENTAGE", "5.0")
            .parse::<Decimal>()
            .context("Invalid DEFAULT_SL_PERCENTAGE")?;
        let default_tp_percentage = env_or("DEFAULT_TP_PERCENTAGE", "2.5")
            .parse::<Decimal>()
            .context("Invalid DEFAULT_TP_PERCENTAGE")?;
        let default_margin_mode = MarginMode::parse(&env_or("DEFAULT_MARGIN_MODE", "CROSSED"))
            .context("Invalid DEFAULT_MARGIN_MODE")?;
        let auto_execute = env_or("AUTO_EXECUTE_TRADES", "true")
            .parse::<bool>()
            .context("Invalid AUTO_EXECUTE_TRADES")?;

        Ok(Self {
            api_key,
            api_secret,
            testnet,
            database_url,
            default_leverage,
            default_position_size,
            default_sl_percentage,
            default_tp_percentage,
            default_margin_mode,
            auto_execute,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

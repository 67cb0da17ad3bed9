//! Per-user trade settings.
//!
//! Stored in the database; new users are seeded from the process-level
//! defaults in [`crate::config::AppConfig`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::models::MarginMode;

/// Settings applied when executing a signal for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeConfig {
    pub user_id: i64,
    pub margin_mode: MarginMode,
    pub leverage: u32,
    /// Margin per trade in quote units (USDT).
    pub position_size: Decimal,
    pub sl_percentage: Decimal,
    pub tp_percentage: Decimal,
    pub auto_execute: bool,
}

impl TradeConfig {
    /// Seed settings for a user who has none yet.
    pub fn defaults_for(user_id: i64, app: &AppConfig) -> Self {
        Self {
            user_id,
            margin_mode: app.default_margin_mode,
            leverage: app.default_leverage,
            position_size: app.default_position_size,
            sl_percentage: app.default_sl_percentage,
            tp_percentage: app.default_tp_percentage,
            auto_execute: app.auto_execute,
        }
    }

    /// Apply a partial update, returning the new settings.
    pub fn apply(&self, update: &TradeConfigUpdate) -> Self {
        Self {
            user_id: self.user_id,
            margin_mode: update.margin_mode.unwrap_or(self.margin_mode),
            leverage: update.leverage.unwrap_or(self.leverage),
            position_size: update.position_size.unwrap_or(self.position_size),
            sl_percentage: update.sl_percentage.unwrap_or(self.sl_percentage),
            tp_percentage: update.tp_percentage.unwrap_or(self.tp_percentage),
            auto_execute: update.auto_execute.unwrap_or(self.auto_execute),
        }
    }
}

/// Partial settings update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct TradeConfigUpdate {
    pub margin_mode: Option<MarginMode>,
    pub leverage: Option<u32>,
    pub position_size: Option<Decimal>,
    pub sl_percentage: Option<Decimal>,
    pub tp_percentage: Option<Decimal>,
    pub auto_execute: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base() -> TradeConfig {
        TradeConfig {
            user_id: 1,
            margin_mode: MarginMode::Crossed,
            leverage: 20,
            position_size: dec!(50),
            sl_percentage: dec!(5),
            tp_percentage: dec!(2.5),
            auto_execute: true,
        }
    }

    #[test]
    fn test_apply_partial_update() {
        let updated = base().apply(&TradeConfigUpdate {
            leverage: Some(10),
            auto_execute: Some(false),
            ..Default::default()
        });
        assert_eq!(updated.leverage, 10);
        assert!(!updated.auto_execute);
        // Untouched fields carry over.
        assert_eq!(updated.position_size, dec!(50));
        assert_eq!(updated.margin_mode, MarginMode::Crossed);
    }
}

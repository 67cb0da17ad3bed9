//! Live position snapshot as reported by the exchange.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Direction;

/// Futures margin mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarginMode {
    Crossed,
    Isolated,
}

impl MarginMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginMode::Crossed => "CROSSED",
            MarginMode::Isolated => "ISOLATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CROSSED" | "CROSS" => Some(MarginMode::Crossed),
            "ISOLATED" => Some(MarginMode::Isolated),
            _ => None,
        }
    }
}

impl std::fmt::Display for MarginMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange-reported live position. Recomputed on every gateway query and
/// never cached beyond a single call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    /// Normalized from the exchange's signed-quantity convention.
    pub side: Direction,
    pub entry_price: Decimal,
    /// Absolute quantity, always positive.
    pub quantity: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: u32,
    pub margin: Decimal,
    pub margin_mode: MarginMode,
    pub liquidation_price: Option<Decimal>,
    pub mark_price: Decimal,
    pub notional: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_margin_mode_parse() {
        assert_eq!(MarginMode::parse("crossed"), Some(MarginMode::Crossed));
        assert_eq!(MarginMode::parse("cross"), Some(MarginMode::Crossed));
        assert_eq!(MarginMode::parse("ISOLATED"), Some(MarginMode::Isolated));
        assert_eq!(MarginMode::parse(""), None);
    }
}

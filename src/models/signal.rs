//! Signal models: parsed trade intents extracted from chat messages.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a signal (futures position side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LONG" => Some(Direction::Long),
            "SHORT" => Some(Direction::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the signal extractor. Pure parse result, not yet persisted.
///
/// `stop_loss` and `take_profit` are always derived from the entry price and
/// the configured percentages; any SL/TP stated in the message is kept only
/// as provenance in the `stated_*` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSignal {
    pub pair: String,
    pub direction: Direction,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub stated_stop_loss: Option<Decimal>,
    pub stated_take_profit: Option<Decimal>,
}

/// Persisted signal record. Immutable once written; retained for audit and
/// for re-derivation of trades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: i64,
    pub pair: String,
    pub direction: Direction,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub stated_stop_loss: Option<Decimal>,
    pub stated_take_profit: Option<Decimal>,
    /// Raw message text the signal was extracted from.
    pub raw_message: String,
    /// Label of the channel the message arrived on.
    pub channel: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_roundtrip() {
        assert_eq!(Direction::parse("long"), Some(Direction::Long));
        assert_eq!(Direction::parse("SHORT"), Some(Direction::Short));
        assert_eq!(Direction::parse("sideways"), None);
        assert_eq!(Direction::Long.as_str(), "LONG");
    }
}

//! Trade model: the exchange execution lifecycle of a signal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::Direction;

/// Order side on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// Entry side for a position direction: BUY opens a LONG, SELL a SHORT.
    pub fn entry_for(direction: Direction) -> Self {
        match direction {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }

    /// Inverted side, used for protective and closing orders.
    pub fn inverted(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a trade. Transitions only move forward:
/// PENDING -> OPEN -> CLOSED, with CANCELLED as a terminal alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Pending,
    Open,
    Closed,
    Cancelled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Open => "OPEN",
            TradeStatus::Closed => "CLOSED",
            TradeStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Some(TradeStatus::Pending),
            "OPEN" => Some(TradeStatus::Open),
            "CLOSED" => Some(TradeStatus::Closed),
            "CANCELLED" => Some(TradeStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a trade left the OPEN state. SL/TP inference after the fact is a
/// price-based heuristic; the exchange does not report the actual cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    TpHit,
    SlHit,
    Manual,
    Liquidation,
    Unknown,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TpHit => "TP_HIT",
            ExitReason::SlHit => "SL_HIT",
            ExitReason::Manual => "MANUAL",
            ExitReason::Liquidation => "LIQUIDATION",
            ExitReason::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TP_HIT" => Some(ExitReason::TpHit),
            "SL_HIT" => Some(ExitReason::SlHit),
            "MANUAL" => Some(ExitReason::Manual),
            "LIQUIDATION" => Some(ExitReason::Liquidation),
            "UNKNOWN" => Some(ExitReason::Unknown),
            _ => None,
        }
    }
}

/// Persisted trade record, owned exclusively by the execution and
/// reconciliation logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub user_id: i64,
    /// Originating signal, when the trade came from the parse pipeline.
    pub signal_id: Option<i64>,
    pub pair: String,
    pub direction: Direction,
    pub leverage: u32,
    pub entry_price: Decimal,
    pub entry_quantity: Option<Decimal>,
    /// Exchange order id of the entry order.
    pub order_id: Option<String>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub status: TradeStatus,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub pnl_percent: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub created_at: DateTime<Utc>,
}

impl Trade {
    /// Unleveraged return percentage if the trade were closed at `exit_price`.
    pub fn pnl_percent_at(&self, exit_price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let pct = match self.direction {
            Direction::Long => (exit_price - self.entry_price) / self.entry_price,
            Direction::Short => (self.entry_price - exit_price) / self.entry_price,
        };
        pct * dec!(100)
    }

    /// Absolute P&L at `exit_price`, based on the filled entry quantity.
    pub fn pnl_at(&self, exit_price: Decimal) -> Option<Decimal> {
        let quantity = self.entry_quantity?;
        let diff = match self.direction {
            Direction::Long => exit_price - self.entry_price,
            Direction::Short => self.entry_price - exit_price,
        };
        Some(diff * quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(direction: Direction) -> Trade {
        Trade {
            id: 1,
            user_id: 1,
            signal_id: Some(1),
            pair: "BTCUSDT".to_string(),
            direction,
            leverage: 20,
            entry_price: dec!(42000),
            entry_quantity: Some(dec!(0.5)),
            order_id: Some("123".to_string()),
            stop_loss: dec!(39900),
            take_profit: dec!(43050),
            status: TradeStatus::Open,
            opened_at: Some(Utc::now()),
            closed_at: None,
            exit_price: None,
            pnl: None,
            pnl_percent: None,
            exit_reason: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_pnl_long() {
        let trade = sample(Direction::Long);
        assert_eq!(trade.pnl_at(dec!(43000)), Some(dec!(500)));
        assert_eq!(trade.pnl_at(dec!(41000)), Some(dec!(-500)));
        assert_eq!(trade.pnl_percent_at(dec!(44100)), dec!(5));
    }

    #[test]
    fn test_pnl_short() {
        let trade = sample(Direction::Short);
        assert_eq!(trade.pnl_at(dec!(41000)), Some(dec!(500)));
        assert_eq!(trade.pnl_at(dec!(43000)), Some(dec!(-500)));
        assert_eq!(trade.pnl_percent_at(dec!(39900)), dec!(5));
    }

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::entry_for(Direction::Long), Side::Buy);
        assert_eq!(Side::entry_for(Direction::Short), Side::Sell);
        assert_eq!(Side::Buy.inverted(), Side::Sell);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(TradeStatus::parse("open"), Some(TradeStatus::Open));
        assert_eq!(TradeStatus::parse("CLOSED"), Some(TradeStatus::Closed));
        assert_eq!(TradeStatus::parse("bogus"), None);
    }
}

//! Data models for signals, trades, and exchange positions.

mod position;
mod signal;
mod trade;

pub use position::{MarginMode, PositionSnapshot};
pub use signal::{Direction, ParsedSignal, Signal};
pub use trade::{ExitReason, Side, Trade, TradeStatus};

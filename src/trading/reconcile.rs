//! Reconciliation of local trade records against live exchange positions.
//!
//! Protective orders close positions on the exchange without telling us, so
//! the local ledger drifts. Reconciliation closes any OPEN trade whose
//! symbol no longer has a live position, inferring the exit cause from the
//! current mark price relative to the trade's SL/TP levels.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use tracing::info;

use crate::db::Database;
use crate::exchange::BinanceFutures;
use crate::models::{Direction, ExitReason, Trade};

pub struct Reconciler {
    exchange: Arc<BinanceFutures>,
    db: Arc<Database>,
}

impl Reconciler {
    pub fn new(exchange: Arc<BinanceFutures>, db: Arc<Database>) -> Self {
        Self { exchange, db }
    }

    /// Close local records for positions that vanished on the exchange.
    /// Returns the number of trades closed.
    pub async fn sync(&self, user_id: i64) -> Result<usize> {
        let open = self.db.open_trades(user_id).await?;
        if open.is_empty() {
            return Ok(0);
        }

        let live: HashSet<String> = self
            .exchange
            .get_positions()
            .await?
            .into_iter()
            .map(|p| p.symbol)
            .collect();

        let mut closed = 0;
        for trade in open {
            if live.contains(&trade.pair) {
                continue;
            }
            self.close_vanished(&trade).await?;
            closed += 1;
        }
        Ok(closed)
    }

    async fn close_vanished(&self, trade: &Trade) -> Result<()> {
        let mark = self.exchange.mark_price(&trade.pair).await?;
        let reason = infer_exit_reason(
            trade.direction,
            mark,
            trade.stop_loss,
            trade.take_profit,
        );
        let pnl = trade.pnl_at(mark);
        let pnl_percent = trade.pnl_percent_at(mark);

        self.db
            .close_trade_record(trade.id, mark, reason, pnl, pnl_percent)
            .await?;
        info!(
            trade_id = trade.id,
            pair = %trade.pair,
            %mark,
            reason = reason.as_str(),
            "closed vanished position"
        );
        Ok(())
    }
}

/// Infer why a position closed from where the price sits relative to the
/// trade's protective levels. A heuristic: the exchange does not report
/// which order fired.
pub fn infer_exit_reason(
    direction: Direction,
    price: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
) -> ExitReason {
    match direction {
        Direction::Long => {
            if price <= stop_loss {
                ExitReason::SlHit
            } else if price >= take_profit {
                ExitReason::TpHit
            } else {
                ExitReason::Unknown
            }
        }
        Direction::Short => {
            if price >= stop_loss {
                ExitReason::SlHit
            } else if price <= take_profit {
                ExitReason::TpHit
            } else {
                ExitReason::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_infer_exit_reason_long() {
        let sl = dec!(39900);
        let tp = dec!(43050);
        assert_eq!(
            infer_exit_reason(Direction::Long, dec!(39800), sl, tp),
            ExitReason::SlHit
        );
        assert_eq!(
            infer_exit_reason(Direction::Long, dec!(43100), sl, tp),
            ExitReason::TpHit
        );
        assert_eq!(
            infer_exit_reason(Direction::Long, dec!(41000), sl, tp),
            ExitReason::Unknown
        );
        // Exact touch counts as a hit.
        assert_eq!(
            infer_exit_reason(Direction::Long, sl, sl, tp),
            ExitReason::SlHit
        );
    }

    #[test]
    fn test_infer_exit_reason_short() {
        let sl = dec!(2625);
        let tp = dec!(2437.5);
        assert_eq!(
            infer_exit_reason(Direction::Short, dec!(2700), sl, tp),
            ExitReason::SlHit
        );
        assert_eq!(
            infer_exit_reason(Direction::Short, dec!(2400), sl, tp),
            ExitReason::TpHit
        );
        assert_eq!(
            infer_exit_reason(Direction::Short, dec!(2500), sl, tp),
            ExitReason::Unknown
        );
    }
}

//! Trade service: the seam between message intake, the extractor, the
//! exchange gateway, and persistence.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::db::{Database, NewTrade};
use crate::exchange::BinanceFutures;
use crate::models::{ParsedSignal, PositionSnapshot, Signal, Trade, TradeStatus};
use crate::parser::{ParseError, SignalParser};

use super::config::{TradeConfig, TradeConfigUpdate};
use super::executor::{Executor, OpenRequest, ProtectiveOrder};
use super::reconcile::Reconciler;

/// How a freshly extracted signal was acted on.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Auto-execution disabled; the signal was only recorded.
    Recorded,
    Executed { trade_id: i64 },
    Failed { reason: String },
}

/// Result of processing one incoming message that contained a signal.
#[derive(Debug)]
pub struct SignalOutcome {
    pub signal_id: i64,
    pub parsed: ParsedSignal,
    pub execution: ExecutionOutcome,
}

/// A live exchange position joined with its local trade record, if one
/// exists.
#[derive(Debug)]
pub struct ActivePosition {
    pub position: PositionSnapshot,
    pub trade: Option<Trade>,
    /// Return on margin, leveraged, as a percentage.
    pub roi_percent: Decimal,
}

pub struct TradeService {
    db: Arc<Database>,
    exchange: Arc<BinanceFutures>,
    executor: Executor,
    reconciler: Reconciler,
    app: AppConfig,
}

impl TradeService {
    pub fn new(db: Arc<Database>, exchange: Arc<BinanceFutures>, app: AppConfig) -> Self {
        let executor = Executor::new(Arc::clone(&exchange));
        let reconciler = Reconciler::new(Arc::clone(&exchange), Arc::clone(&db));
        Self {
            db,
            exchange,
            executor,
            reconciler,
            app,
        }
    }

    /// Handle one incoming chat message. Returns `None` when the message
    /// does not parse as a signal; that is the common case and not an error.
    ///
    /// Execution requires both `allow_execute` and the user's stored
    /// `auto_execute` flag; otherwise the signal is only recorded.
    pub async fn process_message(
        &self,
        user_id: i64,
        sender: &str,
        text: &str,
        allow_execute: bool,
    ) -> Result<Option<SignalOutcome>> {
        self.db.insert_raw_message(sender, text).await?;

        let config = self.config(user_id).await?;
        let parser = SignalParser::new(config.sl_percentage, config.tp_percentage);
        let parsed = match parser.parse(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(sender, error = %e, "message is not a signal");
                return Ok(None);
            }
        };

        let signal_id = self.db.insert_signal(&parsed, text, sender).await?;
        info!(
            signal_id,
            pair = %parsed.pair,
            direction = %parsed.direction,
            entry = %parsed.entry,
            "signal extracted"
        );

        let execution = if allow_execute && config.auto_execute {
            match self.execute(signal_id, &parsed, &config).await {
                Ok(trade_id) => ExecutionOutcome::Executed { trade_id },
                Err(e) => {
                    error!(signal_id, error = %e, "signal execution failed");
                    ExecutionOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        } else {
            ExecutionOutcome::Recorded
        };

        Ok(Some(SignalOutcome {
            signal_id,
            parsed,
            execution,
        }))
    }

    /// Parse a message with a user's configured percentages, without
    /// persisting or executing anything.
    pub async fn parse_preview(
        &self,
        user_id: i64,
        text: &str,
    ) -> Result<std::result::Result<ParsedSignal, ParseError>> {
        let config = self.config(user_id).await?;
        let parser = SignalParser::new(config.sl_percentage, config.tp_percentage);
        Ok(parser.parse(text))
    }

    /// Execute a previously recorded signal.
    pub async fn execute_signal(&self, signal_id: i64, user_id: i64) -> Result<i64> {
        let signal = self
            .db
            .get_signal(signal_id)
            .await?
            .with_context(|| format!("Signal {signal_id} not found"))?;
        let config = self.config(user_id).await?;
        let parsed = ParsedSignal {
            pair: signal.pair.clone(),
            direction: signal.direction,
            entry: signal.entry,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            stated_stop_loss: signal.stated_stop_loss,
            stated_take_profit: signal.stated_take_profit,
        };
        self.execute(signal.id, &parsed, &config).await
    }

    /// Run the open protocol and record the trade. No record is written
    /// when the protocol fails before or at the entry order.
    async fn execute(
        &self,
        signal_id: i64,
        parsed: &ParsedSignal,
        config: &TradeConfig,
    ) -> Result<i64> {
        let request = OpenRequest {
            symbol: parsed.pair.clone(),
            direction: parsed.direction,
            margin: config.position_size,
            leverage: config.leverage,
            margin_mode: config.margin_mode,
            entry_price: parsed.entry,
            stop_loss: parsed.stop_loss,
            take_profit: parsed.take_profit,
        };
        let report = self.executor.open_position(&request).await?;

        // The position is live from here on; protective-order problems are
        // reported, not fatal.
        match &report.stop_loss {
            ProtectiveOrder::Placed { .. } => {}
            ProtectiveOrder::Skipped { reason } => {
                warn!(signal_id, reason, "stop-loss skipped")
            }
            ProtectiveOrder::Failed { reason } => {
                warn!(signal_id, reason, "position is live without a stop-loss")
            }
        }
        match &report.take_profit {
            ProtectiveOrder::Placed { .. } => {}
            ProtectiveOrder::Skipped { reason } => {
                warn!(signal_id, reason, "take-profit skipped")
            }
            ProtectiveOrder::Failed { reason } => {
                warn!(signal_id, reason, "take-profit order failed")
            }
        }

        let filled = report.entry_filled();
        let entry_price = if filled && !report.entry.price.is_zero() {
            report.entry.price
        } else {
            parsed.entry
        };
        let trade_id = self
            .db
            .insert_trade(&NewTrade {
                user_id: config.user_id,
                signal_id: Some(signal_id),
                pair: parsed.pair.clone(),
                direction: parsed.direction,
                leverage: report.applied_leverage,
                entry_price,
                entry_quantity: Some(report.entry.quantity),
                order_id: Some(report.entry.order_id.clone()),
                stop_loss: parsed.stop_loss,
                take_profit: parsed.take_profit,
                status: if filled {
                    TradeStatus::Open
                } else {
                    TradeStatus::Pending
                },
                opened: filled,
            })
            .await
            .inspect_err(|e| {
                // Position is live but unrecorded; reconciliation will never
                // find it, so surface loudly.
                error!(signal_id, error = %e, "trade record insert failed after entry order");
            })?;

        info!(trade_id, signal_id, status = if filled { "OPEN" } else { "PENDING" }, "trade recorded");
        Ok(trade_id)
    }

    /// Close an open trade at market and record the exit as manual.
    pub async fn close_trade(&self, trade_id: i64) -> Result<Trade> {
        let trade = self
            .db
            .get_trade(trade_id)
            .await?
            .with_context(|| format!("Trade {trade_id} not found"))?;
        if trade.status != TradeStatus::Open {
            bail!("Trade {trade_id} is {} and cannot be closed", trade.status);
        }

        let exit_price = match self.exchange.position_for_symbol(&trade.pair).await? {
            Some(position) => {
                let result = self.exchange.close_position(&position).await?;
                if result.price.is_zero() {
                    self.exchange.mark_price(&trade.pair).await?
                } else {
                    result.price
                }
            }
            // Already flat on the exchange; record the close at mark.
            None => self.exchange.mark_price(&trade.pair).await?,
        };

        let pnl = trade.pnl_at(exit_price);
        let pnl_percent = trade.pnl_percent_at(exit_price);
        self.db
            .close_trade_record(
                trade_id,
                exit_price,
                crate::models::ExitReason::Manual,
                pnl,
                pnl_percent,
            )
            .await?;

        self.db
            .get_trade(trade_id)
            .await?
            .with_context(|| format!("Trade {trade_id} disappeared after close"))
    }

    /// Live positions joined with local trade records. Reconciles first so
    /// stale records do not show up as active.
    pub async fn active_positions(&self, user_id: i64) -> Result<Vec<ActivePosition>> {
        self.reconciler.sync(user_id).await?;

        let positions = self.exchange.get_positions().await?;
        let open = self.db.open_trades(user_id).await?;

        Ok(positions
            .into_iter()
            .map(|position| {
                let trade = open.iter().find(|t| t.pair == position.symbol).cloned();
                let roi_percent = match &trade {
                    Some(t) => {
                        t.pnl_percent_at(position.mark_price) * Decimal::from(t.leverage)
                    }
                    None if !position.margin.is_zero() => {
                        position.unrealized_pnl / position.margin * dec!(100)
                    }
                    None => Decimal::ZERO,
                };
                ActivePosition {
                    position,
                    trade,
                    roi_percent,
                }
            })
            .collect())
    }

    /// Reconcile local records against the exchange. Returns how many
    /// trades were closed.
    pub async fn sync(&self, user_id: i64) -> Result<usize> {
        self.reconciler.sync(user_id).await
    }

    pub async fn total_pnl(&self, user_id: i64) -> Result<Decimal> {
        self.db.total_pnl(user_id).await
    }

    pub async fn balance(&self) -> Result<Decimal> {
        Ok(self.exchange.account_balance().await?)
    }

    pub async fn signal(&self, id: i64) -> Result<Option<Signal>> {
        self.db.get_signal(id).await
    }

    pub async fn signals(&self, limit: i64) -> Result<Vec<Signal>> {
        self.db.list_signals(limit).await
    }

    pub async fn trades(
        &self,
        user_id: i64,
        status: Option<TradeStatus>,
        limit: i64,
    ) -> Result<Vec<Trade>> {
        self.db.list_trades(user_id, status, limit).await
    }

    pub async fn config(&self, user_id: i64) -> Result<TradeConfig> {
        self.db.get_or_create_config(user_id, &self.app).await
    }

    pub async fn update_config(
        &self,
        user_id: i64,
        update: &TradeConfigUpdate,
    ) -> Result<TradeConfig> {
        self.db.update_config(user_id, &self.app, update).await
    }

    pub async fn reset_config(&self, user_id: i64) -> Result<TradeConfig> {
        self.db.reset_config(user_id, &self.app).await
    }
}

//! Guarded multi-step order placement.
//!
//! Opening a position runs a fixed protocol: position guard, symbol rules,
//! leverage, margin mode, quantity sizing with a minimum-notional precheck,
//! limit entry, then protective SL/TP orders. A failure before the entry
//! order aborts cleanly; failures after the entry is placed are reported per
//! protective order so the caller can still record the trade.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::exchange::types::SymbolRules;
use crate::exchange::{
    BinanceFutures, ConditionalKind, ExchangeError, OrderResult, CODE_WOULD_TRIGGER_IMMEDIATELY,
};
use crate::models::{Direction, MarginMode, Side};

/// Buffer added to the exchange minimum when prechecking notional, so
/// orders do not land exactly on the limit.
const NOTIONAL_BUFFER: Decimal = dec!(0.10);

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("a position already exists on {symbol} ({side} {quantity})")]
    PositionExists {
        symbol: String,
        side: Direction,
        quantity: Decimal,
    },
    #[error(
        "cannot open a {requested} position on {symbol}: an open {existing} position exists \
         and the exchange refuses margin-type changes while it does; close it first"
    )]
    MarginTypeConflict {
        symbol: String,
        existing: MarginMode,
        requested: MarginMode,
    },
    #[error(
        "order notional {notional} is below the {min} minimum for this symbol; \
         needs margin >= {min_margin} at current leverage, or leverage >= {min_leverage}"
    )]
    BelowMinNotional {
        notional: Decimal,
        min: Decimal,
        min_margin: Decimal,
        min_leverage: u32,
    },
    #[error("computed quantity rounds to zero at this symbol's step size")]
    QuantityTooSmall,
    /// The entry order itself was rejected; no position was opened.
    #[error("entry order failed: {0}")]
    Entry(ExchangeError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Request to open a position.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub symbol: String,
    pub direction: Direction,
    /// Margin committed to the trade, in quote units.
    pub margin: Decimal,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    /// Limit price for the entry order, also used for sizing.
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Outcome of a protective (SL/TP) order placement.
#[derive(Debug, Clone)]
pub enum ProtectiveOrder {
    Placed { order_id: String },
    /// Not placed, but deliberately: the market already moved past the
    /// trigger, so the order is moot rather than broken.
    Skipped { reason: String },
    Failed { reason: String },
}

impl ProtectiveOrder {
    pub fn order_id(&self) -> Option<&str> {
        match self {
            ProtectiveOrder::Placed { order_id } => Some(order_id),
            _ => None,
        }
    }
}

/// Full outcome of an open-position protocol run.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub entry: OrderResult,
    pub applied_leverage: u32,
    pub stop_loss: ProtectiveOrder,
    pub take_profit: ProtectiveOrder,
}

impl ExecutionReport {
    /// Entry order filled immediately.
    pub fn entry_filled(&self) -> bool {
        self.entry.status == "FILLED"
    }
}

/// Runs the open-position protocol against the exchange gateway.
pub struct Executor {
    exchange: Arc<BinanceFutures>,
}

impl Executor {
    pub fn new(exchange: Arc<BinanceFutures>) -> Self {
        Self { exchange }
    }

    /// Open a position. Steps before the entry order abort the whole run;
    /// protective-order failures after the entry fill are reported in the
    /// returned [`ExecutionReport`] instead.
    pub async fn open_position(
        &self,
        request: &OpenRequest,
    ) -> Result<ExecutionReport, ExecutionError> {
        let symbol = request.symbol.as_str();

        // Step 1: refuse to stack onto an existing position. A position
        // under the other margin mode is its own error: the exchange will
        // not change margin type while it stays open.
        if let Some(position) = self.exchange.position_for_symbol(symbol).await? {
            if position.margin_mode != request.margin_mode {
                return Err(ExecutionError::MarginTypeConflict {
                    symbol: position.symbol,
                    existing: position.margin_mode,
                    requested: request.margin_mode,
                });
            }
            return Err(ExecutionError::PositionExists {
                symbol: position.symbol,
                side: position.side,
                quantity: position.quantity,
            });
        }

        // Step 2: symbol trading rules.
        let rules = self.exchange.symbol_rules(symbol).await?;

        // Step 3: leverage, clamped to the symbol's bracket maximum.
        let max = self.exchange.max_leverage(symbol).await?;
        let requested = request.leverage.min(max);
        if requested < request.leverage {
            warn!(
                symbol,
                requested = request.leverage,
                max,
                "leverage clamped to symbol maximum"
            );
        }
        let applied_leverage = self.exchange.set_leverage(symbol, requested).await?;

        // Step 4: margin mode. Conflicting-but-harmless responses are
        // absorbed by the gateway.
        self.exchange
            .set_margin_type(symbol, request.margin_mode)
            .await?;

        // Step 5: sizing and minimum-notional precheck.
        let quantity = self.size_quantity(request, applied_leverage, &rules)?;

        // Step 6: limit entry at the signalled price.
        let entry_side = Side::entry_for(request.direction);
        let entry = self
            .exchange
            .place_limit_order(symbol, entry_side, quantity, request.entry_price, &rules)
            .await
            .map_err(ExecutionError::Entry)?;
        info!(
            symbol,
            side = %entry_side,
            %quantity,
            order_id = %entry.order_id,
            status = %entry.status,
            "entry order placed"
        );

        // Step 7: protective orders on the inverted side, sized to the
        // ordered quantity.
        let exit_side = entry_side.inverted();
        let stop_loss = self
            .place_protective(
                symbol,
                exit_side,
                ConditionalKind::StopMarket,
                request.stop_loss,
                entry.quantity,
                &rules,
            )
            .await;
        let take_profit = self
            .place_protective(
                symbol,
                exit_side,
                ConditionalKind::TakeProfitMarket,
                request.take_profit,
                entry.quantity,
                &rules,
            )
            .await;

        Ok(ExecutionReport {
            entry,
            applied_leverage,
            stop_loss,
            take_profit,
        })
    }

    /// Quantity from margin and leverage, quantized to the symbol step.
    fn size_quantity(
        &self,
        request: &OpenRequest,
        leverage: u32,
        rules: &SymbolRules,
    ) -> Result<Decimal, ExecutionError> {
        let notional = request.margin * Decimal::from(leverage);
        let quantity = (notional / request.entry_price).round_dp(rules.quantity_precision);
        if quantity.is_zero() {
            return Err(ExecutionError::QuantityTooSmall);
        }

        let order_notional = quantity * request.entry_price;
        let buffered_min = rules.min_notional + NOTIONAL_BUFFER;
        if order_notional <= buffered_min {
            let min_margin = (buffered_min / Decimal::from(leverage)).round_dp(2) + dec!(0.01);
            let min_leverage = (buffered_min / request.margin)
                .floor()
                .to_u32()
                .unwrap_or(u32::MAX)
                .saturating_add(1);
            return Err(ExecutionError::BelowMinNotional {
                notional: order_notional,
                min: rules.min_notional,
                min_margin,
                min_leverage,
            });
        }
        Ok(quantity)
    }

    async fn place_protective(
        &self,
        symbol: &str,
        side: Side,
        kind: ConditionalKind,
        trigger: Decimal,
        quantity: Decimal,
        rules: &SymbolRules,
    ) -> ProtectiveOrder {
        let outcome = classify_protective(
            self.exchange
                .place_conditional_order(symbol, side, kind, trigger, quantity, rules)
                .await,
        );
        match &outcome {
            ProtectiveOrder::Placed { order_id } => {
                info!(symbol, ?kind, %trigger, order_id, "protective order placed");
            }
            ProtectiveOrder::Skipped { .. } => {
                // The market already crossed the trigger; nothing to protect.
                warn!(symbol, ?kind, %trigger, "protective order moot, skipping");
            }
            ProtectiveOrder::Failed { reason } => {
                error!(symbol, ?kind, %trigger, reason = %reason, "protective order failed");
            }
        }
        outcome
    }
}

/// Map a conditional-order result onto its protective outcome. A -2021
/// rejection means the market already sits past the trigger.
fn classify_protective(result: Result<String, ExchangeError>) -> ProtectiveOrder {
    match result {
        Ok(order_id) => ProtectiveOrder::Placed { order_id },
        Err(ExchangeError::Rejected { code, message })
            if code == CODE_WOULD_TRIGGER_IMMEDIATELY =>
        {
            ProtectiveOrder::Skipped { reason: message }
        }
        Err(e) => ProtectiveOrder::Failed {
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> Executor {
        Executor::new(Arc::new(
            BinanceFutures::new("test_key", "test_secret", true).unwrap(),
        ))
    }

    fn request(margin: Decimal, leverage: u32, entry: Decimal) -> OpenRequest {
        OpenRequest {
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Long,
            margin,
            leverage,
            margin_mode: MarginMode::Crossed,
            entry_price: entry,
            stop_loss: dec!(39900),
            take_profit: dec!(43050),
        }
    }

    fn rules(min_notional: Decimal) -> SymbolRules {
        SymbolRules {
            price_precision: 2,
            quantity_precision: 3,
            min_notional,
        }
    }

    #[test]
    fn test_size_quantity_quantizes_to_step() {
        let quantity = executor()
            .size_quantity(&request(dec!(50), 20, dec!(42000)), 20, &rules(dec!(5)))
            .unwrap();
        assert_eq!(quantity, dec!(0.024));
    }

    #[test]
    fn test_size_quantity_rejects_zero_quantity() {
        let err = executor()
            .size_quantity(&request(dec!(1), 1, dec!(42000)), 1, &rules(dec!(5)))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::QuantityTooSmall));
    }

    #[test]
    fn test_size_quantity_below_min_notional_carries_hints() {
        // margin 0.20 at 20x gives a 4 USDT order on a 100 min-notional
        // symbol; the error must say what would pass.
        let err = executor()
            .size_quantity(&request(dec!(0.20), 20, dec!(2)), 20, &rules(dec!(100)))
            .unwrap_err();
        match err {
            ExecutionError::BelowMinNotional {
                notional,
                min,
                min_margin,
                min_leverage,
            } => {
                assert_eq!(notional, dec!(4));
                assert_eq!(min, dec!(100));
                assert_eq!(min_margin, dec!(5.01));
                assert_eq!(min_leverage, 501);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classify_protective_outcomes() {
        let placed = classify_protective(Ok("42".to_string()));
        assert_eq!(placed.order_id(), Some("42"));

        let skipped = classify_protective(Err(ExchangeError::Rejected {
            code: CODE_WOULD_TRIGGER_IMMEDIATELY,
            message: "Order would immediately trigger.".to_string(),
        }));
        assert!(matches!(skipped, ProtectiveOrder::Skipped { .. }));
        assert_eq!(skipped.order_id(), None);

        // Any other rejection is a real failure.
        let failed = classify_protective(Err(ExchangeError::Rejected {
            code: -2019,
            message: "Margin is insufficient.".to_string(),
        }));
        assert!(matches!(failed, ProtectiveOrder::Failed { .. }));
    }
}

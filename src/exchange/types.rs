//! Wire types for the USDⓈ-M futures REST API.
//!
//! Numeric fields arrive as strings on the wire; conversion to `Decimal`
//! happens at the gateway boundary, never here.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Error body returned with a non-2xx status.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub msg: String,
}

/// Acknowledgement for a regular order (market or limit).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: i64,
    pub symbol: String,
    /// NEW, PARTIALLY_FILLED, FILLED, ...
    pub status: String,
    pub orig_qty: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub avg_price: Option<String>,
}

/// Acknowledgement for a conditional (algo) order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgoAck {
    pub algo_id: i64,
}

/// One entry of the position risk endpoint. Zero-quantity rows are
/// placeholders for symbols with no open position.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    pub position_amt: String,
    pub entry_price: String,
    #[serde(default)]
    pub un_realized_profit: String,
    pub leverage: String,
    #[serde(default)]
    pub isolated_margin: String,
    pub margin_type: String,
    #[serde(default)]
    pub liquidation_price: String,
    pub mark_price: String,
    #[serde(default)]
    pub notional: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub filters: Vec<SymbolFilter>,
}

/// Symbol filter entries. Only the fields the gateway reads are modelled.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFilter {
    pub filter_type: String,
    #[serde(default)]
    pub tick_size: Option<String>,
    #[serde(default)]
    pub step_size: Option<String>,
    #[serde(default)]
    pub notional: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageBracketEntry {
    pub symbol: String,
    pub brackets: Vec<Bracket>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bracket {
    pub initial_leverage: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerPrice {
    pub symbol: String,
    pub price: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageAck {
    pub leverage: u32,
    pub symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetBalance {
    pub asset: String,
    pub balance: String,
    pub available_balance: String,
}

/// Per-symbol trading rules derived from the exchange info filters.
#[derive(Debug, Clone, Copy)]
pub struct SymbolRules {
    /// Fractional digits allowed in prices (from PRICE_FILTER tickSize).
    pub price_precision: u32,
    /// Fractional digits allowed in quantities (from LOT_SIZE stepSize).
    pub quantity_precision: u32,
    /// Minimum order notional in quote units (from MIN_NOTIONAL).
    pub min_notional: Decimal,
}

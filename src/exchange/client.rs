//! Signed REST gateway for USDⓈ-M futures.
//!
//! Every private call is authenticated with an HMAC-SHA256 signature over
//! the canonical (alphabetically sorted) query string, plus a millisecond
//! timestamp and a fixed receive window. Decimal quantization against the
//! symbol's trading rules happens here, at the boundary, so callers work in
//! full-precision `Decimal` throughout.

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Direction, MarginMode, PositionSnapshot, Side};

use super::types::{
    AlgoAck, ApiError, AssetBalance, Bracket, ExchangeInfo, LeverageAck, LeverageBracketEntry,
    OrderAck, PositionRisk, SymbolRules, TickerPrice,
};

type HmacSha256 = Hmac<Sha256>;

pub const MAINNET_URL: &str = "https://fapi.binance.com";
pub const TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Fixed receive window for signed requests, in milliseconds.
const RECV_WINDOW: u64 = 10_000;

/// Margin type already set; not an error.
pub const CODE_NO_NEED_TO_CHANGE_MARGIN: i64 = -4046;
/// Margin type change blocked by existing open orders; treated as unchanged.
pub const CODE_MARGIN_BLOCKED_BY_ORDERS: i64 = -4067;
/// Conditional order would trigger immediately.
pub const CODE_WOULD_TRIGGER_IMMEDIATELY: i64 = -2021;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The exchange rejected the request with a structured error body.
    #[error("exchange rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("unexpected HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("failed to decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),
}

/// Kind of conditional (trigger) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalKind {
    StopMarket,
    TakeProfitMarket,
}

impl ConditionalKind {
    fn as_str(&self) -> &'static str {
        match self {
            ConditionalKind::StopMarket => "STOP_MARKET",
            ConditionalKind::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }
}

/// Result of a placed order, normalized to domain types.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    /// Ordered quantity after quantization.
    pub quantity: Decimal,
    /// Average fill price when filled, otherwise the requested price.
    pub price: Decimal,
    pub status: String,
}

impl OrderResult {
    fn from_ack(ack: OrderAck, side: Side, fallback_price: Decimal) -> Self {
        // Ordered quantity, not executed: resting and partially filled
        // entries still need protective orders covering the full size.
        let quantity = Decimal::from_str(&ack.orig_qty).unwrap_or_default();
        let price = ack
            .avg_price
            .as_deref()
            .and_then(|p| Decimal::from_str(p).ok())
            .filter(|p| !p.is_zero())
            .or_else(|| {
                ack.price
                    .as_deref()
                    .and_then(|p| Decimal::from_str(p).ok())
                    .filter(|p| !p.is_zero())
            })
            .unwrap_or(fallback_price);
        Self {
            order_id: ack.order_id.to_string(),
            symbol: ack.symbol,
            side,
            quantity,
            price,
            status: ack.status,
        }
    }
}

/// Gateway to the futures REST API.
pub struct BinanceFutures {
    http: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
}

impl BinanceFutures {
    pub fn new(api_key: &str, api_secret: &str, testnet: bool) -> Result<Self, ExchangeError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let base_url = if testnet { TESTNET_URL } else { MAINNET_URL };
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            base_url: base_url.to_string(),
        })
    }

    /// Hex HMAC-SHA256 of the canonical query string.
    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Build the canonical query string: parameters sorted by key, joined
    /// as `k=v` pairs with `&`.
    ///
    /// Values are emitted verbatim. Everything this gateway sends (symbols,
    /// enum keywords, decimal and integer renderings, UUIDs, booleans) is
    /// URL-safe as-is, so the signed string and the transmitted query stay
    /// byte-identical.
    fn canonical_query(mut params: Vec<(&'static str, String)>) -> String {
        params.sort_by(|a, b| a.0.cmp(b.0));
        params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Send a signed request. Timestamp, receive window, and signature are
    /// appended here; callers pass only the endpoint parameters.
    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<T, ExchangeError> {
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        params.push(("recvWindow", RECV_WINDOW.to_string()));

        let query = Self::canonical_query(params);
        let signature = self.sign(&query);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        debug!(%method, path, "signed request");
        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::decode_response(path, resp).await
    }

    /// Send an unauthenticated request to a public endpoint.
    async fn public_request<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(&'static str, String)>,
    ) -> Result<T, ExchangeError> {
        let url = if params.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, Self::canonical_query(params))
        };
        let resp = self.http.get(&url).send().await?;
        Self::decode_response(path, resp).await
    }

    async fn decode_response<T: DeserializeOwned>(
        path: &str,
        resp: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<ApiError>(&body) {
                return Err(ExchangeError::Rejected {
                    code: err.code,
                    message: err.msg,
                });
            }
            return Err(ExchangeError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ExchangeError::Decode {
            endpoint: path.to_string(),
            message: e.to_string(),
        })
    }

    /// All open positions, normalized. Zero-quantity placeholder rows are
    /// dropped and the signed-quantity convention is folded into a side.
    pub async fn get_positions(&self) -> Result<Vec<PositionSnapshot>, ExchangeError> {
        let rows: Vec<PositionRisk> = self
            .signed_request(Method::GET, "/fapi/v2/positionRisk", Vec::new())
            .await?;
        Ok(rows.into_iter().filter_map(snapshot_from_risk).collect())
    }

    /// Open position for one symbol, if any.
    pub async fn position_for_symbol(
        &self,
        symbol: &str,
    ) -> Result<Option<PositionSnapshot>, ExchangeError> {
        let rows: Vec<PositionRisk> = self
            .signed_request(
                Method::GET,
                "/fapi/v2/positionRisk",
                vec![("symbol", symbol.to_string())],
            )
            .await?;
        Ok(rows.into_iter().find_map(snapshot_from_risk))
    }

    /// Trading rules for a symbol, derived from its exchange info filters.
    pub async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ExchangeError> {
        let info: ExchangeInfo = self
            .public_request("/fapi/v1/exchangeInfo", vec![("symbol", symbol.to_string())])
            .await?;
        let sym = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;

        let mut rules = SymbolRules {
            price_precision: 2,
            quantity_precision: 3,
            min_notional: dec!(5),
        };
        for filter in sym.filters {
            match filter.filter_type.as_str() {
                "PRICE_FILTER" => {
                    if let Some(tick) = filter.tick_size.as_deref() {
                        rules.price_precision = precision_from_step(tick);
                    }
                }
                "LOT_SIZE" => {
                    if let Some(step) = filter.step_size.as_deref() {
                        rules.quantity_precision = precision_from_step(step);
                    }
                }
                "MIN_NOTIONAL" => {
                    if let Some(notional) = filter.notional.as_deref() {
                        if let Ok(min) = Decimal::from_str(notional) {
                            rules.min_notional = min;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(rules)
    }

    /// Maximum leverage allowed for a symbol, from its first bracket tier.
    pub async fn max_leverage(&self, symbol: &str) -> Result<u32, ExchangeError> {
        let entries: Vec<LeverageBracketEntry> = self
            .signed_request(
                Method::GET,
                "/fapi/v1/leverageBracket",
                vec![("symbol", symbol.to_string())],
            )
            .await?;
        Ok(entries
            .first()
            .and_then(|e| e.brackets.first())
            .map(|b: &Bracket| b.initial_leverage)
            .unwrap_or(20))
    }

    /// Set the leverage for a symbol. Returns the leverage the exchange
    /// actually applied.
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<u32, ExchangeError> {
        let ack: LeverageAck = self
            .signed_request(
                Method::POST,
                "/fapi/v1/leverage",
                vec![
                    ("symbol", symbol.to_string()),
                    ("leverage", leverage.to_string()),
                ],
            )
            .await?;
        Ok(ack.leverage)
    }

    /// Set the margin type for a symbol. "Already set" and "blocked by open
    /// orders" responses are soft successes: the position proceeds under
    /// the existing mode.
    pub async fn set_margin_type(
        &self,
        symbol: &str,
        mode: MarginMode,
    ) -> Result<(), ExchangeError> {
        let result: Result<serde_json::Value, ExchangeError> = self
            .signed_request(
                Method::POST,
                "/fapi/v1/marginType",
                vec![
                    ("symbol", symbol.to_string()),
                    ("marginType", mode.as_str().to_string()),
                ],
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(ExchangeError::Rejected { code, message }) if is_soft_margin_type_code(code) => {
                warn!(symbol, code, %message, "margin type unchanged");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Current mark price for a symbol.
    pub async fn mark_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let ticker: TickerPrice = self
            .public_request("/fapi/v1/ticker/price", vec![("symbol", symbol.to_string())])
            .await?;
        Decimal::from_str(&ticker.price).map_err(|e| ExchangeError::Decode {
            endpoint: "/fapi/v1/ticker/price".to_string(),
            message: e.to_string(),
        })
    }

    /// Available USDT balance on the futures wallet.
    pub async fn account_balance(&self) -> Result<Decimal, ExchangeError> {
        let balances: Vec<AssetBalance> = self
            .signed_request(Method::GET, "/fapi/v2/balance", Vec::new())
            .await?;
        Ok(balances
            .iter()
            .find(|b| b.asset == "USDT")
            .and_then(|b| Decimal::from_str(&b.available_balance).ok())
            .unwrap_or_default())
    }

    /// Place a market order. Quantity must already be quantized.
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<OrderResult, ExchangeError> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.to_string()),
            ("newClientOrderId", uuid::Uuid::new_v4().to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        if reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        let ack: OrderAck = self
            .signed_request(Method::POST, "/fapi/v1/order", params)
            .await?;
        Ok(OrderResult::from_ack(ack, side, Decimal::ZERO))
    }

    /// Place a good-til-cancelled limit order at `price`, quantized to the
    /// symbol's price precision.
    pub async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        rules: &SymbolRules,
    ) -> Result<OrderResult, ExchangeError> {
        let price = price.round_dp(rules.price_precision);
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", quantity.to_string()),
            ("price", price.to_string()),
            ("newClientOrderId", uuid::Uuid::new_v4().to_string()),
        ];
        let ack: OrderAck = self
            .signed_request(Method::POST, "/fapi/v1/order", params)
            .await?;
        Ok(OrderResult::from_ack(ack, side, price))
    }

    /// Place a conditional stop/take-profit order triggered on mark price.
    ///
    /// When the order's notional falls below the symbol minimum, it is
    /// flagged reduce-only, which exempts it from the notional check.
    pub async fn place_conditional_order(
        &self,
        symbol: &str,
        side: Side,
        kind: ConditionalKind,
        trigger_price: Decimal,
        quantity: Decimal,
        rules: &SymbolRules,
    ) -> Result<String, ExchangeError> {
        let trigger = trigger_price.round_dp(rules.price_precision);
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("algoType", "CONDITIONAL".to_string()),
            ("type", kind.as_str().to_string()),
            ("triggerPrice", trigger.to_string()),
            ("quantity", quantity.to_string()),
            ("workingType", "MARK_PRICE".to_string()),
        ];
        if quantity * trigger < rules.min_notional {
            params.push(("reduceOnly", "true".to_string()));
        }
        let ack: AlgoAck = self
            .signed_request(Method::POST, "/fapi/v1/algoOrder", params)
            .await?;
        Ok(ack.algo_id.to_string())
    }

    /// Cancel every open order on a symbol.
    pub async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed_request(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                vec![("symbol", symbol.to_string())],
            )
            .await?;
        Ok(())
    }

    /// Close an open position at market: cancel protective orders, then
    /// send a reduce-only market order on the inverted side.
    pub async fn close_position(
        &self,
        position: &PositionSnapshot,
    ) -> Result<OrderResult, ExchangeError> {
        self.cancel_all_orders(&position.symbol).await?;
        let side = Side::entry_for(position.side).inverted();
        self.place_market_order(&position.symbol, side, position.quantity, true)
            .await
    }
}

/// Rejection codes that leave the margin type usable as it already is.
fn is_soft_margin_type_code(code: i64) -> bool {
    matches!(
        code,
        CODE_NO_NEED_TO_CHANGE_MARGIN | CODE_MARGIN_BLOCKED_BY_ORDERS
    )
}

/// Fractional digits implied by a filter step string: "0.001000" has 3,
/// "1" has 0.
fn precision_from_step(step: &str) -> u32 {
    Decimal::from_str(step)
        .map(|d| d.normalize().scale())
        .unwrap_or(0)
}

fn snapshot_from_risk(row: PositionRisk) -> Option<PositionSnapshot> {
    let amount = Decimal::from_str(&row.position_amt).ok()?;
    if amount.is_zero() {
        return None;
    }
    let side = if amount.is_sign_positive() {
        Direction::Long
    } else {
        Direction::Short
    };
    let leverage = row.leverage.parse::<u32>().unwrap_or(1).max(1);
    let margin_mode = MarginMode::parse(&row.margin_type).unwrap_or(MarginMode::Crossed);
    let notional = Decimal::from_str(&row.notional).unwrap_or_default().abs();
    let margin = match margin_mode {
        MarginMode::Isolated => Decimal::from_str(&row.isolated_margin).unwrap_or_default(),
        MarginMode::Crossed => notional / Decimal::from(leverage),
    };
    let liquidation_price = Decimal::from_str(&row.liquidation_price)
        .ok()
        .filter(|p| !p.is_zero());

    Some(PositionSnapshot {
        symbol: row.symbol,
        side,
        entry_price: Decimal::from_str(&row.entry_price).ok()?,
        quantity: amount.abs(),
        unrealized_pnl: Decimal::from_str(&row.un_realized_profit).unwrap_or_default(),
        leverage,
        margin,
        margin_mode,
        liquidation_price,
        mark_price: Decimal::from_str(&row.mark_price).unwrap_or_default(),
        notional,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> BinanceFutures {
        BinanceFutures::new("test_key", "test_secret", true).unwrap()
    }

    #[test]
    fn test_signature_is_stable_hex() {
        let client = test_client();
        let sig1 = client.sign("recvWindow=10000&symbol=BTCUSDT&timestamp=1700000000000");
        let sig2 = client.sign("recvWindow=10000&symbol=BTCUSDT&timestamp=1700000000000");
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);
        assert!(sig1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_varies_with_query() {
        let client = test_client();
        assert_ne!(client.sign("symbol=BTCUSDT"), client.sign("symbol=ETHUSDT"));
    }

    #[test]
    fn test_canonical_query_sorts_keys() {
        let query = BinanceFutures::canonical_query(vec![
            ("timestamp", "1700000000000".to_string()),
            ("symbol", "BTCUSDT".to_string()),
            ("leverage", "20".to_string()),
        ]);
        assert_eq!(query, "leverage=20&symbol=BTCUSDT&timestamp=1700000000000");
    }

    #[test]
    fn test_canonical_query_values_stay_url_safe() {
        // Representative values of every kind the gateway sends; none may
        // need percent-encoding, or signature and URL would diverge.
        let query = BinanceFutures::canonical_query(vec![
            ("symbol", "BTCUSDT".to_string()),
            ("quantity", dec!(0.024).to_string()),
            ("type", "TAKE_PROFIT_MARKET".to_string()),
            ("reduceOnly", "true".to_string()),
            ("newClientOrderId", uuid::Uuid::new_v4().to_string()),
            ("timestamp", 1_700_000_000_000i64.to_string()),
        ]);
        assert!(query
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '=' | '&' | '.' | '_' | '-')));
    }

    #[test]
    fn test_soft_margin_type_codes() {
        assert!(is_soft_margin_type_code(CODE_NO_NEED_TO_CHANGE_MARGIN));
        assert!(is_soft_margin_type_code(CODE_MARGIN_BLOCKED_BY_ORDERS));
        assert!(!is_soft_margin_type_code(CODE_WOULD_TRIGGER_IMMEDIATELY));
        assert!(!is_soft_margin_type_code(-2019));
    }

    #[test]
    fn test_rejection_envelope_parses_to_soft_codes() {
        let body = r#"{"code":-4046,"msg":"No need to change margin type."}"#;
        let err: ApiError = serde_json::from_str(body).unwrap();
        assert_eq!(err.code, CODE_NO_NEED_TO_CHANGE_MARGIN);

        let body = r#"{"code":-2021,"msg":"Order would immediately trigger."}"#;
        let err: ApiError = serde_json::from_str(body).unwrap();
        assert_eq!(err.code, CODE_WOULD_TRIGGER_IMMEDIATELY);
    }

    #[test]
    fn test_precision_from_step() {
        assert_eq!(precision_from_step("1"), 0);
        assert_eq!(precision_from_step("0.1"), 1);
        assert_eq!(precision_from_step("0.001000"), 3);
        assert_eq!(precision_from_step("0.00000100"), 6);
        assert_eq!(precision_from_step("garbage"), 0);
    }

    #[test]
    fn test_snapshot_from_risk_normalizes_sign() {
        let row = PositionRisk {
            symbol: "BTCUSDT".to_string(),
            position_amt: "-0.5".to_string(),
            entry_price: "42000".to_string(),
            un_realized_profit: "12.5".to_string(),
            leverage: "20".to_string(),
            isolated_margin: "0".to_string(),
            margin_type: "cross".to_string(),
            liquidation_price: "0".to_string(),
            mark_price: "41975".to_string(),
            notional: "-20987.5".to_string(),
        };
        let snap = snapshot_from_risk(row).unwrap();
        assert_eq!(snap.side, Direction::Short);
        assert_eq!(snap.quantity, dec!(0.5));
        assert_eq!(snap.notional, dec!(20987.5));
        assert_eq!(snap.margin, dec!(1049.375));
        assert_eq!(snap.liquidation_price, None);
        assert_eq!(snap.margin_mode, MarginMode::Crossed);
    }

    #[test]
    fn test_snapshot_skips_flat_rows() {
        let row = PositionRisk {
            symbol: "ETHUSDT".to_string(),
            position_amt: "0".to_string(),
            entry_price: "0".to_string(),
            un_realized_profit: "0".to_string(),
            leverage: "20".to_string(),
            isolated_margin: "0".to_string(),
            margin_type: "cross".to_string(),
            liquidation_price: "0".to_string(),
            mark_price: "2500".to_string(),
            notional: "0".to_string(),
        };
        assert!(snapshot_from_risk(row).is_none());
    }
}

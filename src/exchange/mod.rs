//! Exchange gateway: signed REST access to USDⓈ-M futures.

mod client;
pub mod types;

pub use client::{
    BinanceFutures, ConditionalKind, ExchangeError, OrderResult, CODE_WOULD_TRIGGER_IMMEDIATELY,
    MAINNET_URL, TESTNET_URL,
};

//! Trading logic: execution protocol, reconciliation, per-user settings,
//! and the service tying them together.

mod config;
mod executor;
mod reconcile;
mod service;

pub use config::{TradeConfig, TradeConfigUpdate};
pub use executor::{ExecutionError, ExecutionReport, Executor, OpenRequest, ProtectiveOrder};
pub use reconcile::{infer_exit_reason, Reconciler};
pub use service::{ActivePosition, ExecutionOutcome, SignalOutcome, TradeService};

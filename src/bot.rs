//! Message intake: consumes the incoming message stream, deduplicates, and
//! hands candidate signals to the trade service.
//!
//! The transport is a plain channel; whatever feeds it (a chat listener, a
//! webhook, stdin in development) is outside this module. Messages carry a
//! transport-assigned id used for dedup.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::trading::{ExecutionOutcome, TradeService};

/// One message off the transport.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: i64,
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded set of recently seen message ids. Oldest ids are evicted once
/// capacity is reached, so memory stays flat under sustained traffic.
pub struct SeenMessages {
    set: HashSet<i64>,
    order: VecDeque<i64>,
    capacity: usize,
}

impl SeenMessages {
    pub fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record an id. Returns false if it was already present.
    pub fn insert(&mut self, id: i64) -> bool {
        if !self.set.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// Intake loop state.
pub struct SignalIntake {
    service: Arc<TradeService>,
    user_id: i64,
    /// Process-level execution switch. Both this and the stored per-user
    /// config must be on for a signal to trade.
    auto_execute: bool,
    seen: SeenMessages,
}

impl SignalIntake {
    pub fn new(service: Arc<TradeService>, user_id: i64, auto_execute: bool) -> Self {
        Self {
            service,
            user_id,
            auto_execute,
            seen: SeenMessages::new(1000),
        }
    }

    /// Consume messages until the channel closes or Ctrl-C arrives. A
    /// message being handled when shutdown is requested still runs to
    /// completion; the protocol is never interrupted mid-flight.
    pub async fn run(mut self, mut rx: mpsc::Receiver<IncomingMessage>) -> Result<()> {
        info!("signal intake started");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => self.handle(msg).await,
                        None => {
                            info!("message stream closed");
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle(&mut self, msg: IncomingMessage) {
        debug!(message_id = msg.id, ts = %msg.timestamp, sender = %msg.sender, "message received");
        if !self.seen.insert(msg.id) {
            debug!(message_id = msg.id, "duplicate message dropped");
            return;
        }
        // Signals always carry a hashtagged pair; skip plain chatter cheaply.
        if !msg.text.contains('#') {
            debug!(message_id = msg.id, "no pair tag, ignoring");
            return;
        }

        match self
            .service
            .process_message(self.user_id, &msg.sender, &msg.text, self.auto_execute)
            .await
        {
            Ok(Some(outcome)) => match &outcome.execution {
                ExecutionOutcome::Executed { trade_id } => {
                    info!(
                        message_id = msg.id,
                        signal_id = outcome.signal_id,
                        trade_id,
                        "signal executed"
                    );
                }
                ExecutionOutcome::Recorded => {
                    info!(
                        message_id = msg.id,
                        signal_id = outcome.signal_id,
                        "signal recorded, auto-execution off"
                    );
                }
                ExecutionOutcome::Failed { reason } => {
                    warn!(
                        message_id = msg.id,
                        signal_id = outcome.signal_id,
                        reason,
                        "signal recorded but execution failed"
                    );
                }
            },
            Ok(None) => {
                debug!(message_id = msg.id, "message did not parse as a signal");
            }
            Err(e) => {
                warn!(message_id = msg.id, error = %e, "message handling failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_messages_dedup() {
        let mut seen = SeenMessages::new(10);
        assert!(seen.insert(1));
        assert!(!seen.insert(1));
        assert!(seen.insert(2));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_seen_messages_evicts_oldest() {
        let mut seen = SeenMessages::new(3);
        for id in 1..=4 {
            assert!(seen.insert(id));
        }
        assert_eq!(seen.len(), 3);
        // 1 was evicted, so it reads as unseen again.
        assert!(seen.insert(1));
        // 3 and 4 are still tracked.
        assert!(!seen.insert(3));
        assert!(!seen.insert(4));
    }

    #[test]
    fn test_seen_messages_empty() {
        let seen = SeenMessages::new(3);
        assert!(seen.is_empty());
    }
}

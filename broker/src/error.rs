//! Broker error types.

/// Errors that can occur during broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("order error: {0}")]
    Order(String),

    #[error("cancel failed for order {order_id}: {reason}")]
    Cancel { order_id: i64, reason: String },

    #[error("market data error: {0}")]
    MarketData(String),

    #[error("unknown contract id: {0}")]
    UnknownConId(i64),

    #[error("state file error: {0}")]
    State(String),

    #[error("{0}")]
    Other(String),
}

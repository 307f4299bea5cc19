//! Shared broker types: positions, open orders, quotes, tick rules.

use serde::{Deserialize, Serialize};

/// Opaque broker-assigned contract identifier.
pub type ConId = i64;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Flip BUY to SELL and vice versa.
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// A held position at the broker. Quantity is signed: positive = long,
/// negative = short. Fractional quantities can occur on some venues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub conid: ConId,
    pub quantity: f64,
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub currency: String,
    /// MIC code of the primary exchange, empty when unknown.
    #[serde(default)]
    pub exchange: String,
}

/// An order resting at the broker, not yet filled or cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: i64,
    pub conid: ConId,
    pub side: OrderSide,
    /// Limit price; `None` for order types without one.
    pub price: Option<f64>,
    pub remaining_qty: f64,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub ticker: String,
}

impl OpenOrder {
    /// Remaining quantity with sign: BUY positive, SELL negative.
    pub fn signed_qty(&self) -> f64 {
        match self.side {
            OrderSide::Buy => self.remaining_qty,
            OrderSide::Sell => -self.remaining_qty,
        }
    }
}

/// One-shot market-data snapshot for a contract. Any field may be
/// missing when the venue did not report it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub close: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
}

/// One band of a venue price-increment rule: the minimum tick for
/// prices at or above `low_edge`, up to the next band's edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickBand {
    pub low_edge: f64,
    pub increment: f64,
}

/// How the broker answered a submit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitStatus {
    /// Accepted and working at the venue.
    Submitted,
    /// Accepted, then immediately cancelled by the broker.
    Cancelled,
    /// Rejected because the price does not sit on a valid tick increment.
    RejectedTickSize,
}

/// Result of a successful submit round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub order_id: i64,
    pub status: SubmitStatus,
}

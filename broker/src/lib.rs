//! Collaborator contracts for the rebal portfolio rebalancer.
//!
//! The reconciliation core talks to the outside world through three
//! narrow traits: `BrokerAccount` (positions, open orders, submit,
//! cancel), `MarketData` (snapshots, FX rates, tick rules), and
//! `ExchangeCalendar` (venue open/closed). Implementations:
//!
//! - `mock`: scriptable in-memory gateway for tests
//! - `paper`: JSON-state-file gateway for offline rehearsal runs
//! - `calendar`: weekly exchange-hours table

pub mod calendar;
pub mod error;
pub mod keepalive;
pub mod mock;
pub mod paper;
pub mod types;

pub use error::BrokerError;
pub use types::*;

use rustc_hash::FxHashMap;

/// Account-side broker surface. Each call is synchronous and
/// independently failable; a failed call means the action did not
/// happen at the broker.
pub trait BrokerAccount {
    /// Managed account identifier.
    fn account_id(&self) -> Result<String, BrokerError>;

    /// All current positions, zero-quantity entries included.
    fn positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// All orders still working at the broker.
    fn open_orders(&self) -> Result<Vec<OpenOrder>, BrokerError>;

    /// Cancel a working order. `Ok` only when the broker acknowledged.
    fn cancel(&self, order_id: i64) -> Result<(), BrokerError>;

    /// Submit a DAY limit order.
    fn submit(
        &self,
        conid: ConId,
        side: OrderSide,
        quantity: i64,
        limit_price: f64,
    ) -> Result<SubmitOutcome, BrokerError>;
}

/// Market-data surface: snapshots, currency metadata, FX, tick rules.
pub trait MarketData {
    /// One-shot quote snapshot for a batch of contracts. Contracts the
    /// venue returned nothing for are absent from the map.
    fn snapshot(&self, conids: &[ConId]) -> Result<FxHashMap<ConId, Quote>, BrokerError>;

    /// Trading currency of a contract, if resolvable.
    fn instrument_currency(&self, conid: ConId) -> Result<Option<String>, BrokerError>;

    /// Units of `currency` per 1 USD, if a rate is obtainable.
    /// USD itself always resolves to 1.0.
    fn fx_rate(&self, currency: &str) -> Result<Option<f64>, BrokerError>;

    /// Price-increment rule ids for a contract, one per routable venue.
    fn market_rule_ids(&self, conid: ConId) -> Result<Vec<i32>, BrokerError>;

    /// Bands of one price-increment rule, ordered by ascending
    /// `low_edge`.
    fn tick_rule(&self, rule_id: i32) -> Result<Vec<TickBand>, BrokerError>;
}

/// Venue open/closed lookup by MIC code.
pub trait ExchangeCalendar {
    fn is_open(&self, mic: &str) -> bool;
}

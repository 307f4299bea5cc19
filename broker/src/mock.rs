//! Mock gateway for testing — implements `BrokerAccount` and
//! `MarketData` with scriptable behavior, no network.
//!
//! ```ignore
//! use rebal_broker::mock::MockGateway;
//! use rebal_broker::{OrderSide, Quote};
//!
//! let gw = MockGateway::builder()
//!     .with_position(265598, 40.0, "AAPL", "USD", "XNAS")
//!     .with_quote(265598, Quote { bid: Some(185.0), ask: Some(185.2), ..Default::default() })
//!     .build();
//! ```

use std::sync::Mutex;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::BrokerError;
use crate::types::*;
use crate::{BrokerAccount, ExchangeCalendar, MarketData};

/// A recorded submit call, for assertion in tests.
#[derive(Debug, Clone)]
pub struct RecordedSubmit {
    pub conid: ConId,
    pub side: OrderSide,
    pub quantity: i64,
    pub limit_price: f64,
    pub order_id: i64,
}

/// Builder for `MockGateway`.
#[derive(Default)]
pub struct MockGatewayBuilder {
    account_id: Option<String>,
    positions: Vec<Position>,
    open_orders: Vec<OpenOrder>,
    quotes: FxHashMap<ConId, Quote>,
    currencies: FxHashMap<ConId, String>,
    fx_rates: FxHashMap<String, f64>,
    rule_ids: FxHashMap<ConId, Vec<i32>>,
    tick_rules: FxHashMap<i32, Vec<TickBand>>,
    fail_cancel: FxHashSet<i64>,
    tick_reject_once: FxHashSet<ConId>,
    immediate_cancel: FxHashSet<ConId>,
    submit_error: FxHashSet<ConId>,
}

impl MockGatewayBuilder {
    pub fn with_account_id(mut self, id: &str) -> Self {
        self.account_id = Some(id.to_string());
        self
    }

    pub fn with_position(
        mut self,
        conid: ConId,
        quantity: f64,
        ticker: &str,
        currency: &str,
        exchange: &str,
    ) -> Self {
        self.positions.push(Position {
            conid,
            quantity,
            ticker: ticker.to_string(),
            name: ticker.to_string(),
            currency: currency.to_string(),
            exchange: exchange.to_string(),
        });
        self.currencies.insert(conid, currency.to_string());
        self
    }

    pub fn with_open_order(
        mut self,
        order_id: i64,
        conid: ConId,
        side: OrderSide,
        price: f64,
        remaining_qty: f64,
        exchange: &str,
    ) -> Self {
        self.open_orders.push(OpenOrder {
            order_id,
            conid,
            side,
            price: Some(price),
            remaining_qty,
            exchange: exchange.to_string(),
            ticker: String::new(),
        });
        self
    }

    pub fn with_quote(mut self, conid: ConId, quote: Quote) -> Self {
        self.quotes.insert(conid, quote);
        self
    }

    pub fn with_currency(mut self, conid: ConId, currency: &str) -> Self {
        self.currencies.insert(conid, currency.to_string());
        self
    }

    pub fn with_fx_rate(mut self, currency: &str, rate: f64) -> Self {
        self.fx_rates.insert(currency.to_string(), rate);
        self
    }

    pub fn with_tick_rule(mut self, conid: ConId, rule_id: i32, bands: Vec<TickBand>) -> Self {
        self.rule_ids.entry(conid).or_default().push(rule_id);
        self.tick_rules.insert(rule_id, bands);
        self
    }

    /// Make `cancel(order_id)` fail with an error.
    pub fn failing_cancel(mut self, order_id: i64) -> Self {
        self.fail_cancel.insert(order_id);
        self
    }

    /// Make the first submit for `conid` come back rejected for tick
    /// size; later submits are accepted.
    pub fn tick_reject_once(mut self, conid: ConId) -> Self {
        self.tick_reject_once.insert(conid);
        self
    }

    /// Make submits for `conid` come back immediately cancelled.
    pub fn immediate_cancel(mut self, conid: ConId) -> Self {
        self.immediate_cancel.insert(conid);
        self
    }

    /// Make submits for `conid` error outright.
    pub fn failing_submit(mut self, conid: ConId) -> Self {
        self.submit_error.insert(conid);
        self
    }

    pub fn build(self) -> MockGateway {
        MockGateway {
            account_id: self.account_id.unwrap_or_else(|| "DU000000".to_string()),
            positions: self.positions,
            open_orders: Mutex::new(self.open_orders),
            quotes: self.quotes,
            currencies: self.currencies,
            fx_rates: self.fx_rates,
            rule_ids: self.rule_ids,
            tick_rules: self.tick_rules,
            fail_cancel: self.fail_cancel,
            tick_reject_pending: Mutex::new(self.tick_reject_once),
            immediate_cancel: self.immediate_cancel,
            submit_error: self.submit_error,
            next_order_id: Mutex::new(1000),
            submitted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }
}

/// In-memory gateway that records every submit/cancel and returns
/// configurable responses.
pub struct MockGateway {
    account_id: String,
    positions: Vec<Position>,
    open_orders: Mutex<Vec<OpenOrder>>,
    quotes: FxHashMap<ConId, Quote>,
    currencies: FxHashMap<ConId, String>,
    fx_rates: FxHashMap<String, f64>,
    rule_ids: FxHashMap<ConId, Vec<i32>>,
    tick_rules: FxHashMap<i32, Vec<TickBand>>,
    fail_cancel: FxHashSet<i64>,
    tick_reject_pending: Mutex<FxHashSet<ConId>>,
    immediate_cancel: FxHashSet<ConId>,
    submit_error: FxHashSet<ConId>,
    next_order_id: Mutex<i64>,
    submitted: Mutex<Vec<RecordedSubmit>>,
    cancelled: Mutex<Vec<i64>>,
}

impl MockGateway {
    pub fn builder() -> MockGatewayBuilder {
        MockGatewayBuilder::default()
    }

    /// All submits recorded so far.
    pub fn submitted(&self) -> Vec<RecordedSubmit> {
        self.submitted.lock().unwrap().clone()
    }

    /// Order ids for which cancel succeeded.
    pub fn cancelled(&self) -> Vec<i64> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl BrokerAccount for MockGateway {
    fn account_id(&self) -> Result<String, BrokerError> {
        Ok(self.account_id.clone())
    }

    fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        Ok(self.positions.clone())
    }

    fn open_orders(&self) -> Result<Vec<OpenOrder>, BrokerError> {
        Ok(self.open_orders.lock().unwrap().clone())
    }

    fn cancel(&self, order_id: i64) -> Result<(), BrokerError> {
        if self.fail_cancel.contains(&order_id) {
            return Err(BrokerError::Cancel {
                order_id,
                reason: "mock: cancel rejected".into(),
            });
        }
        self.open_orders
            .lock()
            .unwrap()
            .retain(|o| o.order_id != order_id);
        self.cancelled.lock().unwrap().push(order_id);
        Ok(())
    }

    fn submit(
        &self,
        conid: ConId,
        side: OrderSide,
        quantity: i64,
        limit_price: f64,
    ) -> Result<SubmitOutcome, BrokerError> {
        if self.submit_error.contains(&conid) {
            return Err(BrokerError::Order("mock: submit failed".into()));
        }

        if self.tick_reject_pending.lock().unwrap().remove(&conid) {
            return Ok(SubmitOutcome {
                order_id: 0,
                status: SubmitStatus::RejectedTickSize,
            });
        }

        let mut next = self.next_order_id.lock().unwrap();
        let order_id = *next;
        *next += 1;

        self.submitted.lock().unwrap().push(RecordedSubmit {
            conid,
            side,
            quantity,
            limit_price,
            order_id,
        });

        let status = if self.immediate_cancel.contains(&conid) {
            SubmitStatus::Cancelled
        } else {
            SubmitStatus::Submitted
        };
        Ok(SubmitOutcome { order_id, status })
    }
}

impl MarketData for MockGateway {
    fn snapshot(&self, conids: &[ConId]) -> Result<FxHashMap<ConId, Quote>, BrokerError> {
        Ok(conids
            .iter()
            .filter_map(|cid| self.quotes.get(cid).map(|q| (*cid, *q)))
            .collect())
    }

    fn instrument_currency(&self, conid: ConId) -> Result<Option<String>, BrokerError> {
        Ok(self.currencies.get(&conid).cloned())
    }

    fn fx_rate(&self, currency: &str) -> Result<Option<f64>, BrokerError> {
        if currency.eq_ignore_ascii_case("USD") {
            return Ok(Some(1.0));
        }
        Ok(self.fx_rates.get(currency).copied())
    }

    fn market_rule_ids(&self, conid: ConId) -> Result<Vec<i32>, BrokerError> {
        Ok(self.rule_ids.get(&conid).cloned().unwrap_or_default())
    }

    fn tick_rule(&self, rule_id: i32) -> Result<Vec<TickBand>, BrokerError> {
        Ok(self.tick_rules.get(&rule_id).cloned().unwrap_or_default())
    }
}

/// Calendar stub: every exchange open except the listed ones.
#[derive(Default)]
pub struct MockCalendar {
    closed: FxHashSet<String>,
}

impl MockCalendar {
    pub fn all_open() -> Self {
        Self::default()
    }

    pub fn with_closed<I: IntoIterator<Item = S>, S: Into<String>>(mics: I) -> Self {
        Self {
            closed: mics.into_iter().map(Into::into).collect(),
        }
    }
}

impl ExchangeCalendar for MockCalendar {
    fn is_open(&self, mic: &str) -> bool {
        !self.closed.contains(mic)
    }
}

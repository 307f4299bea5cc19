//! Paper gateway: a JSON-state-file implementation of the collaborator
//! traits, for rehearsing a full rebalance run with no live session.
//!
//! The state file describes an account frozen in time — positions, open
//! orders, quotes, FX rates, and tick rules. Submits are accepted and
//! logged, cancels remove the order from the in-memory book. Nothing is
//! written back to disk.

use std::path::Path;
use std::sync::Mutex;

use log::info;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::types::*;
use crate::{BrokerAccount, MarketData};

/// Serialized account state, the paper gateway's input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperState {
    pub account_id: String,
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub open_orders: Vec<OpenOrder>,
    #[serde(default)]
    pub quotes: FxHashMap<ConId, Quote>,
    /// Units of currency per 1 USD.
    #[serde(default)]
    pub fx_rates: FxHashMap<String, f64>,
    #[serde(default)]
    pub currencies: FxHashMap<ConId, String>,
    #[serde(default)]
    pub market_rule_ids: FxHashMap<ConId, Vec<i32>>,
    #[serde(default)]
    pub tick_rules: FxHashMap<i32, Vec<TickBand>>,
}

/// Offline gateway over a `PaperState`.
pub struct PaperGateway {
    state: PaperState,
    open_orders: Mutex<Vec<OpenOrder>>,
    next_order_id: Mutex<i64>,
}

impl PaperGateway {
    /// Load a state file.
    pub fn load(path: &Path) -> Result<Self, BrokerError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BrokerError::State(format!("{}: {e}", path.display())))?;
        let state: PaperState = serde_json::from_str(&contents)
            .map_err(|e| BrokerError::State(format!("{}: {e}", path.display())))?;
        Ok(Self::new(state))
    }

    pub fn new(state: PaperState) -> Self {
        let max_id = state
            .open_orders
            .iter()
            .map(|o| o.order_id)
            .max()
            .unwrap_or(0);
        let open_orders = Mutex::new(state.open_orders.clone());
        Self {
            state,
            open_orders,
            next_order_id: Mutex::new(max_id + 1),
        }
    }
}

impl BrokerAccount for PaperGateway {
    fn account_id(&self) -> Result<String, BrokerError> {
        Ok(self.state.account_id.clone())
    }

    fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        Ok(self.state.positions.clone())
    }

    fn open_orders(&self) -> Result<Vec<OpenOrder>, BrokerError> {
        Ok(self.open_orders.lock().unwrap().clone())
    }

    fn cancel(&self, order_id: i64) -> Result<(), BrokerError> {
        let mut orders = self.open_orders.lock().unwrap();
        let before = orders.len();
        orders.retain(|o| o.order_id != order_id);
        if orders.len() == before {
            return Err(BrokerError::Cancel {
                order_id,
                reason: "no such working order".into(),
            });
        }
        info!("paper: cancelled order {order_id}");
        Ok(())
    }

    fn submit(
        &self,
        conid: ConId,
        side: OrderSide,
        quantity: i64,
        limit_price: f64,
    ) -> Result<SubmitOutcome, BrokerError> {
        let mut next = self.next_order_id.lock().unwrap();
        let order_id = *next;
        *next += 1;
        info!("paper: accepted {side} {quantity} conid={conid} @ {limit_price:.4} (order {order_id})");
        Ok(SubmitOutcome {
            order_id,
            status: SubmitStatus::Submitted,
        })
    }
}

impl MarketData for PaperGateway {
    fn snapshot(&self, conids: &[ConId]) -> Result<FxHashMap<ConId, Quote>, BrokerError> {
        Ok(conids
            .iter()
            .filter_map(|cid| self.state.quotes.get(cid).map(|q| (*cid, *q)))
            .collect())
    }

    fn instrument_currency(&self, conid: ConId) -> Result<Option<String>, BrokerError> {
        if let Some(ccy) = self.state.currencies.get(&conid) {
            return Ok(Some(ccy.clone()));
        }
        Ok(self
            .state
            .positions
            .iter()
            .find(|p| p.conid == conid && !p.currency.is_empty())
            .map(|p| p.currency.clone()))
    }

    fn fx_rate(&self, currency: &str) -> Result<Option<f64>, BrokerError> {
        if currency.eq_ignore_ascii_case("USD") {
            return Ok(Some(1.0));
        }
        Ok(self.state.fx_rates.get(currency).copied())
    }

    fn market_rule_ids(&self, conid: ConId) -> Result<Vec<i32>, BrokerError> {
        Ok(self
            .state
            .market_rule_ids
            .get(&conid)
            .cloned()
            .unwrap_or_default())
    }

    fn tick_rule(&self, rule_id: i32) -> Result<Vec<TickBand>, BrokerError> {
        Ok(self
            .state
            .tick_rules
            .get(&rule_id)
            .cloned()
            .unwrap_or_default())
    }
}

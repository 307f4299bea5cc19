//! Reconciliation: compare the target book against live broker state.
//!
//! For each row, compute the target quantity, pull the existing
//! position, classify every open order on the instrument as
//! stale/current (cancelling stale ones under the consent protocol),
//! and net it all into the quantity still to be ordered.

use log::warn;
use rustc_hash::FxHashMap;
use serde::Serialize;

use rebal_broker::{
    BrokerAccount, ConId, ExchangeCalendar, MarketData, OpenOrder, OrderSide, Position, Quote,
};

use crate::config::Config;
use crate::consent::{ConsentState, Prompt, resolve_cancel_decision};
use crate::error::Result;
use crate::netting;
use crate::pricing;
use crate::target::TargetBook;

/// Why a row is excluded from ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    NoInstrumentId,
    NoLimitPrice,
    NonPositivePrice,
    NoFxRate(String),
    OnTarget,
    ZeroQuantity,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoInstrumentId => write!(f, "no instrument id"),
            SkipReason::NoLimitPrice => write!(f, "no limit price"),
            SkipReason::NonPositivePrice => write!(f, "non-positive limit price"),
            SkipReason::NoFxRate(ccy) => write!(f, "no exchange rate for {ccy}"),
            SkipReason::OnTarget => write!(f, "already on target"),
            SkipReason::ZeroQuantity => write!(f, "computed quantity is 0"),
        }
    }
}

/// A target row enriched with market data and reconciled against the
/// broker account. Extra-position rows are synthesized in this shape
/// with a zero target.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciledRow {
    pub conid: Option<ConId>,
    pub ticker: String,
    pub name: String,
    pub currency: Option<String>,
    /// Units of local currency per 1 USD.
    pub fx_rate: Option<f64>,
    /// MIC code, empty when unknown.
    pub exchange: String,
    pub dollar_allocation: f64,
    pub is_option: bool,
    pub market_rule_ids: Vec<i32>,
    pub quote: Quote,
    pub limit_price: Option<f64>,
    pub existing_qty: f64,
    pub pending_qty: f64,
    pub target_qty: i64,
    pub net_quantity: i64,
    pub cancelled_orders: u32,
    /// False when reconciliation was skipped (buy-all mode).
    pub reconciled: bool,
    pub skip_reason: Option<SkipReason>,
}

impl ReconciledRow {
    pub fn multiplier(&self) -> i64 {
        if self.is_option { 100 } else { 1 }
    }

    /// Effective FX rate: USD (or no currency) is 1.0, otherwise the
    /// resolved positive rate.
    pub fn fx(&self) -> Option<f64> {
        match self.currency.as_deref() {
            None => Some(1.0),
            Some(ccy) if ccy.eq_ignore_ascii_case("USD") => Some(1.0),
            Some(_) => self.fx_rate.filter(|r| *r > 0.0),
        }
    }

}

/// Output of a reconciliation pass. Positions and remaining open
/// orders are carried along so the extra-position handler does not
/// refetch broker state.
pub struct Reconciliation {
    pub rows: Vec<ReconciledRow>,
    pub positions: FxHashMap<ConId, Position>,
    pub orders_by_conid: FxHashMap<ConId, Vec<OpenOrder>>,
    pub cancelled_total: u32,
}

/// Enrich target rows with quotes, FX rates, and limit prices.
///
/// Market data is fetched once for the whole book. Rows that cannot be
/// priced or converted get an enumerated skip reason instead of being
/// dropped.
pub fn prepare_rows(
    market: &dyn MarketData,
    config: &Config,
    book: &TargetBook,
) -> Result<Vec<ReconciledRow>> {
    let conids = book.conids();
    let snapshot = market.snapshot(&conids)?;

    // One FX lookup per distinct non-USD currency.
    let mut fx_rates: FxHashMap<String, Option<f64>> = FxHashMap::default();
    for row in &book.rows {
        if let Some(ccy) = row.currency.as_deref() {
            let ccy = ccy.to_uppercase();
            if ccy != "USD" && !fx_rates.contains_key(&ccy) {
                let rate = market.fx_rate(&ccy)?;
                if rate.is_none() {
                    warn!("no FX rate for {ccy}; rows in {ccy} will be skipped");
                }
                fx_rates.insert(ccy, rate);
            }
        }
    }

    let mut rows = Vec::with_capacity(book.rows.len());
    for target in &book.rows {
        let quote = target
            .conid
            .and_then(|cid| snapshot.get(&cid).copied())
            .unwrap_or_default();

        let side_hint = if target.dollar_allocation < 0.0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let limit_price = pricing::limit_price(&quote, side_hint, config.execution.fill_patience);

        let currency = target.currency.as_deref().map(str::to_uppercase);
        let fx_rate = match currency.as_deref() {
            None | Some("USD") => Some(1.0),
            Some(ccy) => fx_rates.get(ccy).copied().flatten(),
        };

        let skip_reason = if target.conid.is_none() {
            Some(SkipReason::NoInstrumentId)
        } else if limit_price.is_none() {
            Some(SkipReason::NoLimitPrice)
        } else if limit_price.is_some_and(|p| p <= 0.0) {
            Some(SkipReason::NonPositivePrice)
        } else if fx_rate.is_none() {
            Some(SkipReason::NoFxRate(
                currency.clone().unwrap_or_else(|| "?".into()),
            ))
        } else {
            None
        };

        rows.push(ReconciledRow {
            conid: target.conid,
            ticker: target.ticker.clone(),
            name: if target.name.is_empty() {
                target.ticker.clone()
            } else {
                target.name.clone()
            },
            currency,
            fx_rate,
            exchange: target.exchange_code(),
            dollar_allocation: target.dollar_allocation,
            is_option: target.is_option,
            market_rule_ids: target.market_rule_ids.clone(),
            quote,
            limit_price,
            existing_qty: 0.0,
            pending_qty: 0.0,
            target_qty: 0,
            net_quantity: 0,
            cancelled_orders: 0,
            reconciled: false,
            skip_reason,
        });
    }
    Ok(rows)
}

/// Stale test: relative drift of the resting price from the fresh
/// limit beyond the venue tolerance.
fn is_stale(order: &OpenOrder, limit_price: f64, tolerance: f64) -> bool {
    match order.price {
        Some(order_price) if limit_price > 0.0 => {
            (order_price - limit_price).abs() / limit_price > tolerance
        }
        _ => false,
    }
}

/// Reconcile prepared rows against live positions and open orders,
/// cancelling stale orders under the consent protocol.
///
/// With `dry_run` no cancels are issued; every order counts as kept.
/// With `all_exchanges` false, orders on closed exchanges are kept
/// without prompting.
#[allow(clippy::too_many_arguments)]
pub fn reconcile(
    account: &dyn BrokerAccount,
    calendar: &dyn ExchangeCalendar,
    config: &Config,
    mut rows: Vec<ReconciledRow>,
    all_exchanges: bool,
    dry_run: bool,
    consent: &mut ConsentState,
    prompt: &mut dyn Prompt,
) -> Result<Reconciliation> {
    println!("Fetching current broker positions ...");
    let positions: FxHashMap<ConId, Position> = account
        .positions()?
        .into_iter()
        .map(|p| (p.conid, p))
        .collect();
    println!("  Found {} position(s).", positions.len());

    println!("Fetching open orders ...");
    let mut orders_by_conid: FxHashMap<ConId, Vec<OpenOrder>> = FxHashMap::default();
    let open_orders = account.open_orders()?;
    println!("  Found {} active open order(s).\n", open_orders.len());
    for order in open_orders {
        orders_by_conid.entry(order.conid).or_default().push(order);
    }

    let mut cancelled_total = 0u32;
    let total = rows.len();

    for (idx, row) in rows.iter_mut().enumerate() {
        if row.skip_reason.is_some() {
            continue;
        }
        let (Some(conid), Some(limit_price), Some(fx)) = (row.conid, row.limit_price, row.fx())
        else {
            continue;
        };
        let label = format!("[{}/{}]", idx + 1, total);

        row.target_qty = netting::target_quantity(
            row.dollar_allocation,
            limit_price,
            fx,
            row.multiplier(),
        );
        row.existing_qty = positions.get(&conid).map_or(0.0, |p| p.quantity);

        let tolerance = config.tolerance.for_exchange(&row.exchange);
        let can_cancel = all_exchanges || (!row.exchange.is_empty() && calendar.is_open(&row.exchange));

        let mut pending = 0.0;
        for order in orders_by_conid.get(&conid).cloned().unwrap_or_default() {
            if !is_stale(&order, limit_price, tolerance) {
                pending += order.signed_qty();
                continue;
            }

            if !can_cancel && !dry_run {
                println!(
                    "  {label} Stale order {} for '{}' kept (exchange {} closed)",
                    order.order_id,
                    row.name,
                    if row.exchange.is_empty() { "?" } else { &row.exchange },
                );
                pending += order.signed_qty();
                continue;
            }

            let header = format!(
                "\n  {label} Stale order {} for '{}' (old price={}, new price={})\n  Exchange: {}",
                order.order_id,
                row.name,
                order.price.map_or_else(|| "?".into(), |p| format!("{p}")),
                limit_price,
                if row.exchange.is_empty() { "?" } else { &row.exchange },
            );
            let decision = resolve_cancel_decision(
                &row.exchange,
                can_cancel && !dry_run,
                consent,
                Some(&header),
                prompt,
            )?;

            if decision.is_cancel() {
                match account.cancel(order.order_id) {
                    Ok(()) => {
                        println!(
                            "  {label} Cancelled stale order {} for '{}'",
                            order.order_id, row.name
                        );
                        row.cancelled_orders += 1;
                        cancelled_total += 1;
                    }
                    Err(e) => {
                        // Cancel failure means the order is still live.
                        warn!("failed to cancel order {}: {e}", order.order_id);
                        pending += order.signed_qty();
                    }
                }
            } else {
                pending += order.signed_qty();
            }
        }
        row.pending_qty = pending;

        row.net_quantity = netting::net_quantity(
            row.target_qty,
            row.existing_qty,
            row.pending_qty,
            Some(limit_price),
            Some(fx),
            row.multiplier(),
            config.execution.min_trade_usd,
        );
        row.reconciled = true;
        if row.net_quantity == 0 {
            row.skip_reason = Some(SkipReason::OnTarget);
        }
    }

    print_summary(&rows, cancelled_total);

    Ok(Reconciliation {
        rows,
        positions,
        orders_by_conid,
        cancelled_total,
    })
}

fn print_summary(rows: &[ReconciledRow], cancelled: u32) {
    let to_buy = rows
        .iter()
        .filter(|r| r.reconciled && r.net_quantity > 0)
        .count();
    let to_sell = rows
        .iter()
        .filter(|r| r.reconciled && r.net_quantity < 0)
        .count();
    let on_target = rows
        .iter()
        .filter(|r| r.reconciled && r.net_quantity == 0)
        .count();
    println!("\nReconciliation complete:");
    println!("  Instruments to BUY     : {to_buy}");
    println!("  Instruments to SELL    : {to_sell}");
    println!("  Already on target      : {on_target}");
    println!("  Stale orders cancelled : {cancelled}\n");
}

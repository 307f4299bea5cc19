//! Broker positions absent from the target book.
//!
//! Any held instrument the book does not mention is treated as having a
//! target of zero: its open orders are all stale by definition, and a
//! synthetic row is emitted so the order loop can liquidate (or cover)
//! the position like any other row.

use log::warn;
use rustc_hash::FxHashMap;

use rebal_broker::{
    BrokerAccount, ConId, ExchangeCalendar, MarketData, OpenOrder, OrderSide, Position,
};

use crate::config::Config;
use crate::consent::{ConsentState, Prompt, resolve_cancel_decision};
use crate::error::Result;
use crate::netting;
use crate::pricing;
use crate::reconcile::{ReconciledRow, SkipReason};

/// Result of the extra-position pass.
pub struct ExtraPositions {
    pub rows: Vec<ReconciledRow>,
    pub cancelled_total: u32,
}

/// Build synthetic rows for held instruments missing from the book.
///
/// `account_cancel` is the cancel half of the broker surface; market
/// data is fetched just-in-time for only the extra instruments. Shares
/// the caller's `ConsentState`, so "cancel all"/"skip all XFRA" answers
/// given during reconciliation keep applying here.
#[allow(clippy::too_many_arguments)]
pub fn reconcile_extra_positions(
    account: &dyn BrokerAccount,
    market: &dyn MarketData,
    calendar: &dyn ExchangeCalendar,
    config: &Config,
    positions: &FxHashMap<ConId, Position>,
    orders_by_conid: &FxHashMap<ConId, Vec<OpenOrder>>,
    known_conids: &[ConId],
    all_exchanges: bool,
    dry_run: bool,
    consent: &mut ConsentState,
    prompt: &mut dyn Prompt,
) -> Result<ExtraPositions> {
    let mut extra_conids: Vec<ConId> = positions
        .iter()
        .filter(|(cid, pos)| !known_conids.contains(cid) && pos.quantity != 0.0)
        .map(|(cid, _)| *cid)
        .collect();
    extra_conids.sort_unstable();

    if extra_conids.is_empty() {
        return Ok(ExtraPositions {
            rows: Vec::new(),
            cancelled_total: 0,
        });
    }

    println!(
        "\nFound {} broker position(s) not in the target book. \
         Fetching market data to prepare closing orders ...",
        extra_conids.len()
    );

    let snapshot = market.snapshot(&extra_conids)?;

    // Currency and FX per extra instrument, one FX lookup per currency.
    let mut currencies: FxHashMap<ConId, String> = FxHashMap::default();
    let mut fx_rates: FxHashMap<String, Option<f64>> = FxHashMap::default();
    for &cid in &extra_conids {
        let ccy = match market.instrument_currency(cid)? {
            Some(ccy) => ccy.to_uppercase(),
            None => positions
                .get(&cid)
                .filter(|p| !p.currency.is_empty())
                .map(|p| p.currency.to_uppercase())
                .unwrap_or_else(|| "USD".into()),
        };
        if ccy != "USD" && !fx_rates.contains_key(&ccy) {
            let rate = market.fx_rate(&ccy)?;
            if rate.is_none() {
                warn!("no FX rate for {ccy}; extra position in {ccy} will not be ordered");
            }
            fx_rates.insert(ccy.clone(), rate);
        }
        currencies.insert(cid, ccy);
    }

    let mut cancelled_total = 0u32;
    let mut rows = Vec::with_capacity(extra_conids.len());

    for &cid in &extra_conids {
        let Some(position) = positions.get(&cid) else {
            continue;
        };
        let existing = position.quantity;
        let mic = position.exchange.trim().to_uppercase();
        let name = if position.name.is_empty() {
            cid.to_string()
        } else {
            position.name.clone()
        };

        let ccy = currencies.get(&cid).cloned().unwrap_or_else(|| "USD".into());
        let fx = if ccy == "USD" {
            Some(1.0)
        } else {
            fx_rates.get(&ccy).copied().flatten()
        };

        // Target is zero, so every open order on the instrument is stale.
        let can_cancel = all_exchanges || (!mic.is_empty() && calendar.is_open(&mic));
        let mut pending = 0.0;
        let mut cancelled = 0u32;
        for order in orders_by_conid.get(&cid).cloned().unwrap_or_default() {
            if !can_cancel && !dry_run {
                println!(
                    "  Extra-position stale order {} for '{name}' kept (exchange {} closed)",
                    order.order_id,
                    if mic.is_empty() { "?" } else { &mic },
                );
                pending += order.signed_qty();
                continue;
            }

            let header = format!(
                "\n  Extra-position stale order {} for '{name}' (price={})\n  Exchange: {}",
                order.order_id,
                order.price.map_or_else(|| "?".into(), |p| format!("{p}")),
                if mic.is_empty() { "?" } else { &mic },
            );
            let decision = resolve_cancel_decision(
                &mic,
                can_cancel && !dry_run,
                consent,
                Some(&header),
                prompt,
            )?;

            if decision.is_cancel() {
                match account.cancel(order.order_id) {
                    Ok(()) => {
                        println!(
                            "  Cancelled extra-position order {} for '{name}'",
                            order.order_id
                        );
                        cancelled += 1;
                        cancelled_total += 1;
                    }
                    Err(e) => {
                        warn!("failed to cancel order {}: {e}", order.order_id);
                        pending += order.signed_qty();
                    }
                }
            } else {
                pending += order.signed_qty();
            }
        }

        // Long positions are sold, short (or flat-with-pending) ones
        // bought to cover.
        let side = if existing > 0.0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let quote = snapshot.get(&cid).copied().unwrap_or_default();
        let mut limit_price =
            pricing::limit_price(&quote, side, config.execution.fill_patience);

        let rule_ids = market.market_rule_ids(cid)?;
        if let Some(price) = limit_price {
            if !rule_ids.is_empty() {
                let mut rules = Vec::with_capacity(rule_ids.len());
                for rid in &rule_ids {
                    rules.push(market.tick_rule(*rid)?);
                }
                if let Some(snapped) = pricing::snap_to_tick(price, &rules, side) {
                    limit_price = Some(snapped);
                }
            }
        }

        let net_quantity = netting::net_quantity(
            0,
            existing,
            pending,
            limit_price,
            fx,
            1,
            config.execution.min_trade_usd,
        );

        let skip_reason = if limit_price.is_none() {
            Some(SkipReason::NoLimitPrice)
        } else if fx.is_none() {
            Some(SkipReason::NoFxRate(ccy.clone()))
        } else if net_quantity == 0 {
            Some(SkipReason::OnTarget)
        } else {
            None
        };

        rows.push(ReconciledRow {
            conid: Some(cid),
            ticker: if position.ticker.is_empty() {
                cid.to_string()
            } else {
                position.ticker.clone()
            },
            name,
            currency: Some(ccy),
            fx_rate: fx,
            exchange: mic,
            dollar_allocation: 0.0,
            is_option: false,
            market_rule_ids: rule_ids,
            quote,
            limit_price,
            existing_qty: existing,
            pending_qty: pending,
            target_qty: 0,
            net_quantity,
            cancelled_orders: cancelled,
            reconciled: true,
            skip_reason,
        });
    }

    if !rows.is_empty() {
        println!("  Prepared {} extra-position row(s) to sell/cover.", rows.len());
    }
    if cancelled_total > 0 {
        println!("  Extra-position orders cancelled: {cancelled_total}");
    }

    Ok(ExtraPositions {
        rows,
        cancelled_total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebal_broker::mock::{MockCalendar, MockGateway};
    use rebal_broker::{BrokerAccount, Quote, TickBand};
    use crate::consent::ScriptedPrompt;

    fn config() -> Config {
        toml::from_str("[gateway]\nstate_file = \"a.json\"\n").unwrap()
    }

    fn run_extra(
        gw: &MockGateway,
        calendar: &MockCalendar,
        all_exchanges: bool,
        dry_run: bool,
        consent: &mut ConsentState,
        prompt: &mut ScriptedPrompt,
    ) -> ExtraPositions {
        let positions: FxHashMap<ConId, Position> = gw
            .positions()
            .unwrap()
            .into_iter()
            .map(|p| (p.conid, p))
            .collect();
        let mut orders_by_conid: FxHashMap<ConId, Vec<OpenOrder>> = FxHashMap::default();
        for o in gw.open_orders().unwrap() {
            orders_by_conid.entry(o.conid).or_default().push(o);
        }
        reconcile_extra_positions(
            gw,
            gw,
            calendar,
            &config(),
            &positions,
            &orders_by_conid,
            &[],
            all_exchanges,
            dry_run,
            consent,
            prompt,
        )
        .unwrap()
    }

    #[test]
    fn long_extra_position_becomes_sell_row() {
        // Scenario B: existing +50, one stale pending SELL 10, exchange
        // open -> order cancelled, net -50.
        let gw = MockGateway::builder()
            .with_position(200, 50.0, "XYZ", "USD", "XNYS")
            .with_open_order(9, 200, OrderSide::Sell, 14.0, 10.0, "XNYS")
            .with_quote(
                200,
                Quote {
                    bid: Some(12.0),
                    ask: Some(12.1),
                    ..Default::default()
                },
            )
            .build();

        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::new(["Y"]);
        let extra = run_extra(
            &gw,
            &MockCalendar::all_open(),
            false,
            false,
            &mut consent,
            &mut prompt,
        );

        assert_eq!(extra.rows.len(), 1);
        assert_eq!(extra.cancelled_total, 1);
        assert_eq!(gw.cancelled(), vec![9]);

        let row = &extra.rows[0];
        assert_eq!(row.target_qty, 0);
        assert_eq!(row.existing_qty, 50.0);
        assert_eq!(row.pending_qty, 0.0);
        assert_eq!(row.net_quantity, -50);
        assert!(row.skip_reason.is_none());
        // Sell side prices off the bid with default patience 20.
        assert_eq!(row.limit_price, Some(12.02));
    }

    #[test]
    fn short_extra_position_becomes_cover_row() {
        let gw = MockGateway::builder()
            .with_position(200, -30.0, "XYZ", "USD", "XNYS")
            .with_quote(
                200,
                Quote {
                    bid: Some(12.0),
                    ask: Some(12.1),
                    ..Default::default()
                },
            )
            .build();

        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::default();
        let extra = run_extra(
            &gw,
            &MockCalendar::all_open(),
            true,
            false,
            &mut consent,
            &mut prompt,
        );

        let row = &extra.rows[0];
        assert_eq!(row.net_quantity, 30);
        // Buy side prices off the ask.
        assert_eq!(row.limit_price, Some(12.08));
    }

    #[test]
    fn dry_run_keeps_orders_and_counts_pending() {
        let gw = MockGateway::builder()
            .with_position(200, 50.0, "XYZ", "USD", "XNYS")
            .with_open_order(9, 200, OrderSide::Sell, 14.0, 10.0, "XNYS")
            .with_quote(
                200,
                Quote {
                    bid: Some(12.0),
                    ask: Some(12.1),
                    ..Default::default()
                },
            )
            .build();

        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::new(["Y"]);
        let extra = run_extra(
            &gw,
            &MockCalendar::all_open(),
            true,
            true,
            &mut consent,
            &mut prompt,
        );

        assert!(prompt.asked.is_empty());
        assert!(gw.cancelled().is_empty());
        let row = &extra.rows[0];
        assert_eq!(row.pending_qty, -10.0);
        // 0 - 50 - (-10) = -40 still to sell.
        assert_eq!(row.net_quantity, -40);
    }

    #[test]
    fn unresolved_currency_reports_but_does_not_order() {
        let gw = MockGateway::builder()
            .with_position(200, 50.0, "XYZ", "CHF", "XSWX")
            .with_quote(
                200,
                Quote {
                    bid: Some(12.0),
                    ask: Some(12.1),
                    ..Default::default()
                },
            )
            .build();

        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::default();
        let extra = run_extra(
            &gw,
            &MockCalendar::all_open(),
            true,
            false,
            &mut consent,
            &mut prompt,
        );

        assert_eq!(extra.rows.len(), 1);
        assert_eq!(
            extra.rows[0].skip_reason,
            Some(SkipReason::NoFxRate("CHF".into()))
        );
    }

    #[test]
    fn zero_quantity_positions_excluded() {
        let gw = MockGateway::builder()
            .with_position(200, 0.0, "XYZ", "USD", "XNYS")
            .build();
        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::default();
        let extra = run_extra(
            &gw,
            &MockCalendar::all_open(),
            true,
            false,
            &mut consent,
            &mut prompt,
        );
        assert!(extra.rows.is_empty());
    }

    #[test]
    fn known_conids_not_duplicated() {
        let gw = MockGateway::builder()
            .with_position(100, 40.0, "AAPL", "USD", "XNAS")
            .build();
        let positions: FxHashMap<ConId, Position> = gw
            .positions()
            .unwrap()
            .into_iter()
            .map(|p| (p.conid, p))
            .collect();
        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::default();
        let extra = reconcile_extra_positions(
            &gw,
            &gw,
            &MockCalendar::all_open(),
            &config(),
            &positions,
            &FxHashMap::default(),
            &[100],
            true,
            false,
            &mut consent,
            &mut prompt,
        )
        .unwrap();
        assert!(extra.rows.is_empty());
    }

    #[test]
    fn limit_price_snapped_to_tick() {
        // Sell prices at bid + 20% of spread = 12.05, then snaps UP to
        // the 0.25 increment: 12.25 (sells never undershoot the tick).
        let gw = MockGateway::builder()
            .with_position(200, 50.0, "XYZ", "USD", "XNYS")
            .with_quote(
                200,
                Quote {
                    bid: Some(12.03),
                    ask: Some(12.12),
                    ..Default::default()
                },
            )
            .with_tick_rule(
                200,
                26,
                vec![TickBand {
                    low_edge: 0.0,
                    increment: 0.25,
                }],
            )
            .build();

        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::default();
        let extra = run_extra(
            &gw,
            &MockCalendar::all_open(),
            true,
            false,
            &mut consent,
            &mut prompt,
        );

        assert_eq!(extra.rows[0].limit_price, Some(12.25));
    }
}

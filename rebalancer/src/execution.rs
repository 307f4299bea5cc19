//! Interactive order execution.
//!
//! Drives the confirm/modify/skip/quit state machine per row, defers
//! large auto-confirmed orders to a forced-manual second pass, retries
//! tick-size rejections at a corrected price, and accumulates the
//! placement ledger. Also hosts the bulk cancel-all mode and the
//! top-level run orchestration.

use log::warn;

use rebal_broker::{
    BrokerAccount, ExchangeCalendar, MarketData, OrderSide, SubmitStatus, TickBand,
};

use crate::audit::{self, AuditLog};
use crate::config::Config;
use crate::consent::{ConsentState, Prompt, resolve_cancel_decision};
use crate::error::Result;
use crate::extra;
use crate::netting;
use crate::pricing;
use crate::reconcile::{self, ReconciledRow, SkipReason};
use crate::target::TargetBook;

/// Options for a rebalance run.
pub struct RunOptions {
    /// Compute and report only; no cancels, no orders.
    pub dry_run: bool,
    /// Start with confirm-all consent (deferred pass still forces
    /// manual review).
    pub force: bool,
    /// Operate on every exchange regardless of trading hours.
    pub all_exchanges: bool,
    /// Skip reconciliation and order the full target quantities.
    pub buy_all: bool,
    pub target_file: String,
}

/// A successfully placed order.
#[derive(Debug, Clone)]
pub struct Placement {
    pub ticker: String,
    pub name: String,
    pub conid: i64,
    pub side: OrderSide,
    pub quantity: i64,
    pub limit_price: f64,
    pub order_id: i64,
}

/// Result of a full run.
pub struct RunReport {
    pub rows: Vec<ReconciledRow>,
    pub placements: Vec<Placement>,
    pub cancelled_orders: u32,
    pub quit_early: bool,
}

/// Everything needed to present and submit one order. Deferred orders
/// are carried as tickets and replayed verbatim.
#[derive(Debug, Clone)]
struct OrderTicket {
    row: ReconciledRow,
    label: String,
    conid: i64,
    side: OrderSide,
    quantity: i64,
    limit_price: f64,
    fx: f64,
}

/// Control signal from one order's prompt loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopSignal {
    Next,
    Quit,
}

pub(crate) fn format_usd(value: f64) -> String {
    format!("${value:.2}")
}

// ---------------------------------------------------------------
// Top-level run
// ---------------------------------------------------------------

/// Execute a full rebalance run: prepare, reconcile, fold in extra
/// positions, then walk the interactive order loop.
pub fn run(
    account: &dyn BrokerAccount,
    market: &dyn MarketData,
    calendar: &dyn ExchangeCalendar,
    config: &Config,
    book: &TargetBook,
    opts: &RunOptions,
    prompt: &mut dyn Prompt,
) -> Result<RunReport> {
    let mut audit = AuditLog::open(&config.audit_path())?;
    let account_id = account.account_id()?;
    println!("Using account: {account_id}\n");
    audit::log_run_started(&mut audit, &opts.target_file, &account_id)?;

    let mut rows = reconcile::prepare_rows(market, config, book)?;

    let mut consent = ConsentState::default();
    if opts.force {
        consent.confirm_all = true;
    }

    let mut cancelled_total = 0u32;
    if opts.buy_all {
        println!("Skipping reconciliation -- ordering full target quantities.\n");
    } else {
        println!("Reconciling target book with broker state ...\n");
        let recon = reconcile::reconcile(
            account,
            calendar,
            config,
            rows,
            opts.all_exchanges,
            opts.dry_run,
            &mut consent,
            prompt,
        )?;
        cancelled_total = recon.cancelled_total;

        let known = book.conids();
        let extra = extra::reconcile_extra_positions(
            account,
            market,
            calendar,
            config,
            &recon.positions,
            &recon.orders_by_conid,
            &known,
            opts.all_exchanges,
            opts.dry_run,
            &mut consent,
            prompt,
        )?;
        rows = recon.rows;
        rows.extend(extra.rows);
        cancelled_total += extra.cancelled_total;
    }

    audit::log_rows_reconciled(&mut audit, &rows)?;

    if opts.dry_run {
        print_plan(&rows);
        println!("\n[DRY RUN] No orders submitted.");
        audit.log_simple("dry_run_completed")?;
        return Ok(RunReport {
            rows,
            placements: Vec::new(),
            cancelled_orders: cancelled_total,
            quit_early: false,
        });
    }

    if !opts.all_exchanges {
        rows = filter_open_exchanges(rows, calendar);
    }

    let (placements, quit_early) =
        run_order_loop(account, market, config, &rows, &mut consent, prompt, &mut audit)?;

    print_order_summary(&placements);
    audit::log_run_completed(&mut audit, placements.len(), cancelled_total, quit_early)?;

    Ok(RunReport {
        rows,
        placements,
        cancelled_orders: cancelled_total,
        quit_early,
    })
}

/// Drop rows whose exchange is currently closed. Rows without exchange
/// info are kept: they cannot be filtered.
fn filter_open_exchanges(
    rows: Vec<ReconciledRow>,
    calendar: &dyn ExchangeCalendar,
) -> Vec<ReconciledRow> {
    let before = rows.len();
    let mut closed_mics = Vec::new();
    let kept: Vec<ReconciledRow> = rows
        .into_iter()
        .filter(|row| {
            if row.exchange.is_empty() || calendar.is_open(&row.exchange) {
                true
            } else {
                if !closed_mics.contains(&row.exchange) {
                    closed_mics.push(row.exchange.clone());
                }
                false
            }
        })
        .collect();

    let removed = before - kept.len();
    if removed > 0 {
        closed_mics.sort();
        println!(
            "Filtered out {removed} row(s) on closed exchanges: {}.\n",
            closed_mics.join(", ")
        );
    } else {
        println!("All exchanges are currently open -- no rows filtered.\n");
    }
    kept
}

// ---------------------------------------------------------------
// Interactive order loop
// ---------------------------------------------------------------

/// Walk every orderable row through the prompt state machine, then
/// replay deferred large orders with auto-confirm disabled.
///
/// Returns the placement ledger and whether the user quit early.
#[allow(clippy::too_many_arguments)]
pub fn run_order_loop(
    account: &dyn BrokerAccount,
    market: &dyn MarketData,
    config: &Config,
    rows: &[ReconciledRow],
    consent: &mut ConsentState,
    prompt: &mut dyn Prompt,
    audit: &mut AuditLog,
) -> Result<(Vec<Placement>, bool)> {
    let mut placements = Vec::new();
    let mut deferred: Vec<OrderTicket> = Vec::new();
    let total = rows.len();

    for (idx, row) in rows.iter().enumerate() {
        let label = format!("[{}/{}]", idx + 1, total);

        if let Some(reason) = &row.skip_reason {
            println!("{label} '{}' ({}) -- {reason}.", row.name, row.ticker);
            continue;
        }
        let Some(ticket) = build_ticket(row, &label) else {
            println!(
                "{label} '{}' ({}) -- {}.",
                row.name,
                row.ticker,
                SkipReason::ZeroQuantity
            );
            continue;
        };

        if consent.auto_skip(&row.exchange) {
            println!(
                "\n{label} {} ({}) -- auto-skipped ({})",
                row.name, row.ticker, row.exchange
            );
            continue;
        }

        let signal = place_single_order(
            account,
            market,
            config,
            ticket,
            consent,
            prompt,
            &mut placements,
            Some(&mut deferred),
            true,
            audit,
        )?;
        if signal == LoopSignal::Quit {
            return Ok((placements, true));
        }
    }

    // Deferred large orders: a prior "confirm all" must not apply, but
    // skip consent gathered so far still does.
    if !deferred.is_empty() {
        let bar = "=".repeat(78);
        println!("\n{bar}");
        println!(
            "  {} LARGE ORDER(S) DEFERRED -- MANUAL APPROVAL REQUIRED",
            deferred.len()
        );
        println!(
            "  (USD amount > {})",
            format_usd(config.execution.max_auto_order_usd)
        );
        println!("{bar}");

        let mut replay_consent = consent.skips_only();
        for ticket in deferred {
            if replay_consent.auto_skip(&ticket.row.exchange) {
                println!(
                    "\n{} {} ({}) -- auto-skipped ({})",
                    ticket.label, ticket.row.name, ticket.row.ticker, ticket.row.exchange
                );
                continue;
            }
            let signal = place_single_order(
                account,
                market,
                config,
                ticket,
                &mut replay_consent,
                prompt,
                &mut placements,
                None,
                false,
                audit,
            )?;
            if signal == LoopSignal::Quit {
                return Ok((placements, true));
            }
        }
    }

    Ok((placements, false))
}

/// Derive side and quantity for a row; `None` when there is nothing to
/// order.
fn build_ticket(row: &ReconciledRow, label: &str) -> Option<OrderTicket> {
    let conid = row.conid?;
    let limit_price = row.limit_price?;
    let fx = row.fx()?;

    let (side, quantity) = if row.reconciled {
        let net = row.net_quantity;
        if net == 0 {
            return None;
        }
        let side = if net < 0 { OrderSide::Sell } else { OrderSide::Buy };
        (side, net.abs())
    } else {
        let qty = netting::target_quantity(row.dollar_allocation, limit_price, fx, row.multiplier());
        if qty == 0 {
            return None;
        }
        let side = if row.dollar_allocation < 0.0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        (side, qty.abs())
    };

    Some(OrderTicket {
        row: row.clone(),
        label: label.to_string(),
        conid,
        side,
        quantity,
        limit_price,
        fx,
    })
}

fn render_ticket(ticket: &OrderTicket) {
    let row = &ticket.row;
    let ccy = row.currency.as_deref().unwrap_or("USD");
    let mic = if row.exchange.is_empty() { "?" } else { &row.exchange };
    let local_amount =
        ticket.limit_price * ticket.quantity as f64 * row.multiplier() as f64;

    println!("\n{} {} ({})", ticket.label, row.name, row.ticker);
    println!("  Side              : {}", ticket.side);
    println!("  Exchange          : {mic}");
    println!("  Currency          : {ccy}");
    println!("  Limit Price       : {:.2} {ccy}", ticket.limit_price);
    println!("  Quantity          : {}", ticket.quantity);
    println!("  Amount            : {local_amount:.2} {ccy}");
    if ccy != "USD" && ticket.fx > 0.0 {
        println!(
            "  Amount (USD)      : {}",
            format_usd(local_amount / ticket.fx)
        );
    }
    if row.reconciled {
        println!("  --- reconciliation ---");
        println!("  Target qty        : {}", row.target_qty);
        println!("  Existing position : {}", row.existing_qty.round() as i64);
        println!("  Pending orders    : {}", row.pending_qty.round() as i64);
        println!("  Net to order      : {}", row.net_quantity);
    } else {
        println!(
            "  Dollar Allocation : {}",
            format_usd(row.dollar_allocation)
        );
    }
}

/// The prompt loop for one order.
///
/// `allow_auto` enables standing confirm consent; with it disabled
/// (deferred replay) every order needs an explicit answer. `deferred`
/// receives large auto-confirmed tickets instead of submitting them;
/// passing `None` disables re-deferral.
#[allow(clippy::too_many_arguments)]
fn place_single_order(
    account: &dyn BrokerAccount,
    market: &dyn MarketData,
    config: &Config,
    mut ticket: OrderTicket,
    consent: &mut ConsentState,
    prompt: &mut dyn Prompt,
    placements: &mut Vec<Placement>,
    mut deferred: Option<&mut Vec<OrderTicket>>,
    allow_auto: bool,
    audit: &mut AuditLog,
) -> Result<LoopSignal> {
    loop {
        render_ticket(&ticket);

        let mic = ticket.row.exchange.clone();
        let mic_label = if mic.is_empty() { "?" } else { &mic };
        let is_auto = allow_auto && consent.auto_confirm(&mic);

        let choice = if is_auto {
            let usd_notional = ticket.limit_price
                * ticket.quantity as f64
                * ticket.row.multiplier() as f64
                / ticket.fx;
            if let Some(queue) = deferred.as_mut() {
                if usd_notional > config.execution.max_auto_order_usd {
                    println!(
                        "  (deferred -- USD amount {} exceeds {} auto-confirm threshold)",
                        format_usd(usd_notional),
                        format_usd(config.execution.max_auto_order_usd)
                    );
                    audit::log_order_deferred(
                        audit,
                        &ticket.row.ticker,
                        usd_notional,
                        config.execution.max_auto_order_usd,
                    )?;
                    queue.push(ticket);
                    return Ok(LoopSignal::Next);
                }
            }
            println!("  (auto-confirmed)");
            "Y".to_string()
        } else {
            prompt.ask(&format!(
                "  [Y] Confirm  [A] Confirm All  [E] Confirm All {mic_label}  [M] Modify\n  \
                 [S] Skip  [X] Skip All {mic_label}  [N] Skip All  [Q] Quit "
            ))?
        };

        match choice.trim().to_uppercase().as_str() {
            c @ ("Y" | "A" | "E") => {
                if c == "A" {
                    consent.confirm_all = true;
                } else if c == "E" {
                    consent.confirm_exchanges.insert(mic.clone());
                }

                match account.submit(ticket.conid, ticket.side, ticket.quantity, ticket.limit_price)
                {
                    Ok(outcome) => match outcome.status {
                        SubmitStatus::RejectedTickSize => {
                            match corrected_tick_price(market, &ticket) {
                                Some(adjusted) if adjusted != ticket.limit_price => {
                                    println!(
                                        "    Price {} rejected (tick-size). Retrying at {} ...",
                                        format_usd(ticket.limit_price),
                                        format_usd(adjusted)
                                    );
                                    ticket.limit_price = adjusted;
                                    continue;
                                }
                                _ => {
                                    println!(
                                        "    [!] Tick-size rejection but no valid tick \
                                         resolves -- skipping."
                                    );
                                    return Ok(LoopSignal::Next);
                                }
                            }
                        }
                        SubmitStatus::Cancelled => {
                            println!(
                                "    [!] Order {} was immediately cancelled -- not counting \
                                 as placed.",
                                outcome.order_id
                            );
                            return Ok(LoopSignal::Next);
                        }
                        SubmitStatus::Submitted => {
                            println!("    Order placed -- order_id: {}", outcome.order_id);
                            let placement = Placement {
                                ticker: ticket.row.ticker.clone(),
                                name: ticket.row.name.clone(),
                                conid: ticket.conid,
                                side: ticket.side,
                                quantity: ticket.quantity,
                                limit_price: ticket.limit_price,
                                order_id: outcome.order_id,
                            };
                            audit::log_order_placed(audit, &placement)?;
                            placements.push(placement);
                            return Ok(LoopSignal::Next);
                        }
                    },
                    Err(e) => {
                        println!("    [!] Order failed: {e}");
                        if is_auto {
                            println!("    Skipping (auto-confirm mode).");
                            return Ok(LoopSignal::Next);
                        }
                        let retry = prompt.ask("    [R] Retry  [S] Skip ")?;
                        if retry.trim().eq_ignore_ascii_case("R") {
                            continue;
                        }
                        return Ok(LoopSignal::Next);
                    }
                }
            }

            "M" => {
                let new_qty = prompt.ask(&format!("  New quantity [{}]", ticket.quantity))?;
                if !new_qty.trim().is_empty() {
                    match new_qty.trim().replace(',', "").parse::<i64>() {
                        Ok(q) if q > 0 => ticket.quantity = q,
                        _ => println!("    Invalid number, keeping original."),
                    }
                }

                let new_price = prompt.ask(&format!(
                    "  New limit price [{}]",
                    format_usd(ticket.limit_price)
                ))?;
                if !new_price.trim().is_empty() {
                    match new_price.trim().replace(['$', ','], "").parse::<f64>() {
                        Ok(p) if p > 0.0 => ticket.limit_price = p,
                        _ => println!("    Invalid number, keeping original."),
                    }
                }

                let new_side = prompt.ask(&format!("  New side [{}]", ticket.side))?;
                match new_side.trim().to_uppercase().as_str() {
                    "BUY" => ticket.side = OrderSide::Buy,
                    "SELL" => ticket.side = OrderSide::Sell,
                    "" => {}
                    _ => println!("    Invalid side, keeping original."),
                }
            }

            "X" => {
                consent.skip_exchanges.insert(mic.clone());
                println!("    Skipped (+ auto-skip all {mic_label}).");
                return Ok(LoopSignal::Next);
            }

            "N" => {
                consent.skip_all = true;
                println!("    Skipped (+ skip all).");
                return Ok(LoopSignal::Next);
            }

            "S" => {
                println!("    Skipped.");
                return Ok(LoopSignal::Next);
            }

            "Q" => {
                println!("    Quitting order loop.");
                return Ok(LoopSignal::Quit);
            }

            _ => {
                println!("    Invalid choice. Please enter Y, A, E, M, S, X, N, or Q.");
            }
        }
    }
}

/// Snap the ticket price onto a valid tick after a rejection. Rule ids
/// come from the row, falling back to a just-in-time lookup.
fn corrected_tick_price(market: &dyn MarketData, ticket: &OrderTicket) -> Option<f64> {
    let rule_ids = if ticket.row.market_rule_ids.is_empty() {
        match market.market_rule_ids(ticket.conid) {
            Ok(ids) => ids,
            Err(e) => {
                warn!("market rule lookup failed for conid {}: {e}", ticket.conid);
                Vec::new()
            }
        }
    } else {
        ticket.row.market_rule_ids.clone()
    };

    let mut rules: Vec<Vec<TickBand>> = Vec::with_capacity(rule_ids.len());
    for rid in rule_ids {
        match market.tick_rule(rid) {
            Ok(bands) => rules.push(bands),
            Err(e) => warn!("tick rule {rid} lookup failed: {e}"),
        }
    }
    pricing::snap_to_tick(ticket.limit_price, &rules, ticket.side)
}

// ---------------------------------------------------------------
// Bulk cancel-all
// ---------------------------------------------------------------

/// Fetch every open order and drive the consent protocol over each.
///
/// With `all_exchanges` false, orders on closed exchanges are skipped
/// without prompting.
pub fn cancel_all_orders(
    account: &dyn BrokerAccount,
    calendar: &dyn ExchangeCalendar,
    all_exchanges: bool,
    prompt: &mut dyn Prompt,
) -> Result<(u32, u32, u32)> {
    println!("Fetching open orders ...");
    let open_orders = account.open_orders()?;

    if open_orders.is_empty() {
        println!("No active orders to cancel.\n");
        return Ok((0, 0, 0));
    }
    println!("Found {} active order(s). Cancelling ...\n", open_orders.len());

    let mut state = ConsentState::default();
    let mut cancelled = 0u32;
    let mut failed = 0u32;
    let mut skipped = 0u32;

    for order in open_orders {
        let mic = order.exchange.trim().to_uppercase();
        let describe = format!(
            "order {}  {} {} {} @ {}",
            order.order_id,
            order.side,
            order.remaining_qty,
            order.ticker,
            order.price.map_or_else(|| "?".into(), |p| format!("{p}")),
        );

        if !all_exchanges && !mic.is_empty() && !calendar.is_open(&mic) {
            println!("  Skipped {describe}  (exchange {mic} closed)");
            skipped += 1;
            continue;
        }

        let header = format!(
            "\n  {describe}  (exchange: {})",
            if mic.is_empty() { "?" } else { &mic }
        );
        let decision = resolve_cancel_decision(&mic, true, &mut state, Some(&header), prompt)?;

        if decision.is_cancel() {
            match account.cancel(order.order_id) {
                Ok(()) => {
                    println!("  Cancelled {describe}");
                    cancelled += 1;
                }
                Err(e) => {
                    println!("  [!] Failed to cancel order {}: {e}", order.order_id);
                    failed += 1;
                }
            }
        } else {
            println!("  Skipped {describe}");
            skipped += 1;
        }
    }

    println!("\nDone: {cancelled} cancelled, {failed} failed, {skipped} skipped.\n");
    Ok((cancelled, failed, skipped))
}

// ---------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------

/// Dry-run plan: one line per row.
fn print_plan(rows: &[ReconciledRow]) {
    println!("\nPLAN:");
    println!(
        "  {:<12} {:<8} {:>6} {:>12} {:>10}  {}",
        "Ticker", "Exch", "Side", "Qty", "Limit", "Note"
    );
    for row in rows {
        let (side, qty) = if row.net_quantity < 0 {
            ("SELL", row.net_quantity.abs())
        } else {
            ("BUY", row.net_quantity)
        };
        let note = row
            .skip_reason
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_default();
        println!(
            "  {:<12} {:<8} {:>6} {:>12} {:>10}  {}",
            row.ticker,
            if row.exchange.is_empty() { "?" } else { &row.exchange },
            side,
            qty,
            row.limit_price
                .map(|p| format!("{p:.2}"))
                .unwrap_or_else(|| "-".into()),
            note,
        );
    }
}

/// Pretty-print the placement ledger.
pub fn print_order_summary(placements: &[Placement]) {
    if placements.is_empty() {
        println!("\nNo orders were placed.");
        return;
    }

    let bar = "=".repeat(78);
    println!("\n{bar}");
    println!("  ORDER SUMMARY");
    println!("{bar}");
    println!(
        "{:<12} {:<28} {:<6} {:>8} {:>10} {:>12}",
        "Ticker", "Name", "Side", "Qty", "Limit", "Order ID"
    );
    println!("{}", "-".repeat(78));
    for p in placements {
        let name: String = p.name.chars().take(26).collect();
        println!(
            "{:<12} {:<28} {:<6} {:>8} {:>10} {:>12}",
            p.ticker,
            name,
            p.side.to_string(),
            p.quantity,
            format_usd(p.limit_price),
            p.order_id,
        );
    }
    println!("{bar}");
    println!("  Total orders placed: {}\n", placements.len());
}

/// Print current broker positions (CLI `positions`).
pub fn show_positions(account: &dyn BrokerAccount) -> Result<()> {
    let account_id = account.account_id()?;
    let positions = account.positions()?;
    println!("Account {account_id}: {} position(s)\n", positions.len());
    if positions.is_empty() {
        return Ok(());
    }
    println!(
        "  {:<12} {:>12} {:<6} {:<8} {}",
        "Ticker", "Qty", "Ccy", "Exch", "Name"
    );
    for p in &positions {
        println!(
            "  {:<12} {:>12} {:<6} {:<8} {}",
            p.ticker, p.quantity, p.currency, p.exchange, p.name
        );
    }
    Ok(())
}

/// Check gateway connectivity (CLI `status`).
pub fn check_status(account: &dyn BrokerAccount) -> Result<()> {
    let account_id = account.account_id()?;
    let positions = account.positions()?;
    let orders = account.open_orders()?;
    println!(
        "Account {account_id}: {} position(s), {} open order(s)",
        positions.len(),
        orders.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebal_broker::Quote;
    use rebal_broker::mock::{MockCalendar, MockGateway};
    use crate::consent::ScriptedPrompt;

    fn config_with(max_auto: f64) -> Config {
        toml::from_str(&format!(
            "[gateway]\nstate_file = \"a.json\"\n[execution]\nmax_auto_order_usd = {max_auto}\n"
        ))
        .unwrap()
    }

    fn audit() -> (tempfile::TempDir, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(&dir.path().join("audit.jsonl")).unwrap();
        (dir, log)
    }

    fn row(conid: i64, net: i64, price: f64) -> ReconciledRow {
        ReconciledRow {
            conid: Some(conid),
            ticker: "AAPL".into(),
            name: "Apple Inc".into(),
            currency: Some("USD".into()),
            fx_rate: Some(1.0),
            exchange: "XNAS".into(),
            dollar_allocation: 10_000.0,
            is_option: false,
            market_rule_ids: Vec::new(),
            quote: Quote::default(),
            limit_price: Some(price),
            existing_qty: 0.0,
            pending_qty: 0.0,
            target_qty: net,
            net_quantity: net,
            cancelled_orders: 0,
            reconciled: true,
            skip_reason: None,
        }
    }

    fn loop_once(
        gw: &MockGateway,
        config: &Config,
        rows: &[ReconciledRow],
        consent: &mut ConsentState,
        prompt: &mut ScriptedPrompt,
    ) -> (Vec<Placement>, bool) {
        let (_dir, mut log) = audit();
        run_order_loop(gw, gw, config, rows, consent, prompt, &mut log).unwrap()
    }

    #[test]
    fn confirm_places_order() {
        let gw = MockGateway::builder().build();
        let rows = vec![row(100, 40, 185.0)];
        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::new(["Y"]);
        let (placements, quit) =
            loop_once(&gw, &config_with(25_000.0), &rows, &mut consent, &mut prompt);

        assert!(!quit);
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].quantity, 40);
        assert_eq!(placements[0].side, OrderSide::Buy);
        assert_eq!(gw.submitted().len(), 1);
    }

    #[test]
    fn negative_net_sells() {
        let gw = MockGateway::builder().build();
        let rows = vec![row(100, -25, 185.0)];
        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::new(["Y"]);
        let (placements, _) =
            loop_once(&gw, &config_with(25_000.0), &rows, &mut consent, &mut prompt);

        assert_eq!(placements[0].side, OrderSide::Sell);
        assert_eq!(placements[0].quantity, 25);
    }

    #[test]
    fn quit_returns_partial_ledger() {
        let gw = MockGateway::builder().build();
        let rows = vec![row(100, 40, 185.0), row(101, 10, 50.0)];
        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::new(["Y", "Q"]);
        let (placements, quit) =
            loop_once(&gw, &config_with(25_000.0), &rows, &mut consent, &mut prompt);

        assert!(quit);
        assert_eq!(placements.len(), 1);
    }

    #[test]
    fn modify_changes_quantity_and_price() {
        let gw = MockGateway::builder().build();
        let rows = vec![row(100, 40, 185.0)];
        let mut consent = ConsentState::default();
        // Modify: qty 25, price 180.50, keep side; then confirm.
        let mut prompt = ScriptedPrompt::new(["M", "25", "$180.50", "", "Y"]);
        let (placements, _) =
            loop_once(&gw, &config_with(25_000.0), &rows, &mut consent, &mut prompt);

        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].quantity, 25);
        assert_eq!(placements[0].limit_price, 180.50);
    }

    #[test]
    fn deferred_boundary_is_strict() {
        // 100 * 185 = $18,500 ceiling: exactly at the ceiling is NOT
        // deferred, one cent above is.
        let gw = MockGateway::builder().build();
        let mut consent = ConsentState {
            confirm_all: true,
            ..Default::default()
        };
        let rows = vec![row(100, 100, 185.0)];
        let mut prompt = ScriptedPrompt::default();
        let (placements, _) =
            loop_once(&gw, &config_with(18_500.0), &rows, &mut consent, &mut prompt);
        assert_eq!(placements.len(), 1, "at the ceiling: placed directly");
        assert!(prompt.asked.is_empty());

        let gw = MockGateway::builder().build();
        let mut consent = ConsentState {
            confirm_all: true,
            ..Default::default()
        };
        let rows = vec![row(100, 100, 185.0)];
        let mut prompt = ScriptedPrompt::new(["Y"]);
        let (placements, _) = loop_once(
            &gw,
            &config_with(18_499.99),
            &rows,
            &mut consent,
            &mut prompt,
        );
        // Above the ceiling: deferred, then manually confirmed.
        assert_eq!(placements.len(), 1);
        assert_eq!(prompt.asked.len(), 1, "deferred pass must prompt");
    }

    #[test]
    fn deferred_replay_honors_skip_consent() {
        let gw = MockGateway::builder().build();
        let mut consent = ConsentState {
            confirm_all: true,
            ..Default::default()
        };
        // Large order deferred; during replay the user skips the whole
        // exchange -- nothing is placed and no further prompt occurs.
        let mut rows = vec![row(100, 100, 185.0), row(101, 100, 185.0)];
        rows[1].ticker = "MSFT".into();
        let mut prompt = ScriptedPrompt::new(["X"]);
        let (placements, _) =
            loop_once(&gw, &config_with(1_000.0), &rows, &mut consent, &mut prompt);

        assert!(placements.is_empty());
        assert_eq!(prompt.asked.len(), 1);
    }

    #[test]
    fn tick_rejection_retries_at_snapped_price() {
        let gw = MockGateway::builder()
            .with_tick_rule(
                100,
                26,
                vec![TickBand {
                    low_edge: 0.0,
                    increment: 0.05,
                }],
            )
            .tick_reject_once(100)
            .build();
        let rows = vec![row(100, 40, 185.37)];
        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::new(["Y"]);
        let (placements, _) =
            loop_once(&gw, &config_with(25_000.0), &rows, &mut consent, &mut prompt);

        assert_eq!(placements.len(), 1);
        // Buy snapped down to the 0.05 grid.
        assert_eq!(placements[0].limit_price, 185.35);
        assert_eq!(gw.submitted().len(), 1, "only the corrected submit records");
    }

    #[test]
    fn tick_rejection_without_rules_abandons_row() {
        let gw = MockGateway::builder().tick_reject_once(100).build();
        let rows = vec![row(100, 40, 185.37)];
        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::new(["Y"]);
        let (placements, quit) =
            loop_once(&gw, &config_with(25_000.0), &rows, &mut consent, &mut prompt);

        assert!(placements.is_empty());
        assert!(!quit, "row abandoned, run continues");
    }

    #[test]
    fn immediately_cancelled_order_not_recorded() {
        let gw = MockGateway::builder().immediate_cancel(100).build();
        let rows = vec![row(100, 40, 185.0)];
        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::new(["Y"]);
        let (placements, _) =
            loop_once(&gw, &config_with(25_000.0), &rows, &mut consent, &mut prompt);

        assert!(placements.is_empty());
        assert_eq!(gw.submitted().len(), 1);
    }

    #[test]
    fn submit_error_offers_retry() {
        let gw = MockGateway::builder().failing_submit(100).build();
        let rows = vec![row(100, 40, 185.0)];
        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::new(["Y", "R", "S"]);
        let (placements, _) =
            loop_once(&gw, &config_with(25_000.0), &rows, &mut consent, &mut prompt);

        assert!(placements.is_empty());
        // Confirm, retry prompt (R), re-presented choice answered skip.
        assert_eq!(prompt.asked.len(), 3);
    }

    #[test]
    fn skip_all_stops_prompting() {
        let gw = MockGateway::builder().build();
        let rows = vec![row(100, 40, 185.0), row(101, 10, 50.0)];
        let mut consent = ConsentState::default();
        let mut prompt = ScriptedPrompt::new(["N"]);
        let (placements, quit) =
            loop_once(&gw, &config_with(25_000.0), &rows, &mut consent, &mut prompt);

        assert!(placements.is_empty());
        assert!(!quit);
        assert_eq!(prompt.asked.len(), 1);
        assert!(consent.skip_all);
    }

    #[test]
    fn cancel_all_respects_closed_exchanges() {
        let gw = MockGateway::builder()
            .with_open_order(1, 100, OrderSide::Buy, 10.0, 5.0, "XNYS")
            .with_open_order(2, 101, OrderSide::Sell, 20.0, 5.0, "XTKS")
            .build();
        let calendar = MockCalendar::with_closed(["XTKS"]);
        let mut prompt = ScriptedPrompt::new(["Y"]);

        let (cancelled, failed, skipped) =
            cancel_all_orders(&gw, &calendar, false, &mut prompt).unwrap();
        assert_eq!((cancelled, failed, skipped), (1, 0, 1));
        assert_eq!(gw.cancelled(), vec![1]);
    }

    #[test]
    fn cancel_all_counts_failures() {
        let gw = MockGateway::builder()
            .with_open_order(1, 100, OrderSide::Buy, 10.0, 5.0, "XNYS")
            .failing_cancel(1)
            .build();
        let mut prompt = ScriptedPrompt::new(["A"]);
        let (cancelled, failed, skipped) =
            cancel_all_orders(&gw, &MockCalendar::all_open(), true, &mut prompt).unwrap();
        assert_eq!((cancelled, failed, skipped), (0, 1, 0));
    }
}

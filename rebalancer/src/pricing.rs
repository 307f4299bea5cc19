//! Limit-price and tick-size utilities.
//!
//! Pure functions: spread interpolation with a fill-patience dial, and
//! snapping prices onto venue tick increments.

use rebal_broker::{OrderSide, Quote, TickBand};

/// Round to cents for display and order prices derived from quotes.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Compute a limit price from a quote snapshot.
///
/// `fill_patience` runs 0–100: 0 crosses the whole spread (take the far
/// side, maximum fill probability), 100 rests on the passive side
/// (best price, may never fill), linear in between. When the quote has
/// no usable bid/ask pair the fallbacks are last trade, prior close,
/// then whichever side is present.
pub fn limit_price(quote: &Quote, side: OrderSide, fill_patience: u8) -> Option<f64> {
    let patience = f64::from(fill_patience.min(100)) / 100.0;

    if let (Some(bid), Some(ask)) = (quote.bid, quote.ask) {
        let spread = ask - bid;
        if spread >= 0.0 && bid > 0.0 {
            let price = match side {
                OrderSide::Buy => ask - spread * patience,
                OrderSide::Sell => bid + spread * patience,
            };
            return Some(round2(price));
        }
    }

    if let Some(last) = quote.last.filter(|p| *p > 0.0) {
        return Some(round2(last));
    }
    if let Some(close) = quote.close.filter(|p| *p > 0.0) {
        return Some(round2(close));
    }
    if let Some(bid) = quote.bid.filter(|p| *p > 0.0) {
        return Some(round2(bid));
    }
    if let Some(ask) = quote.ask.filter(|p| *p > 0.0) {
        return Some(round2(ask));
    }
    None
}

/// Minimum increment applicable to `price` across all of an
/// instrument's rules.
///
/// Each rule is an ascending list of bands; the band in effect is the
/// last one whose `low_edge` is at or below the price. Routing is not
/// fixed in advance, so the *largest* applicable increment wins: a
/// price valid on the most restrictive venue is valid everywhere.
pub fn effective_increment(price: f64, rules: &[Vec<TickBand>]) -> Option<f64> {
    let mut best: Option<f64> = None;
    for bands in rules {
        let applicable = bands
            .iter()
            .take_while(|b| b.low_edge <= price)
            .last()
            .map(|b| b.increment)
            .filter(|inc| *inc > 0.0);
        if let Some(inc) = applicable {
            best = Some(best.map_or(inc, |b: f64| b.max(inc)));
        }
    }
    best
}

/// Snap a price onto a valid tick. Buys snap down and sells snap up,
/// so the snapped price is never more aggressive than the input.
/// Snapping an already-valid price returns it unchanged.
pub fn snap_to_tick(price: f64, rules: &[Vec<TickBand>], side: OrderSide) -> Option<f64> {
    let increment = effective_increment(price, rules)?;

    // Tolerate float noise from the division so on-tick prices stay put.
    let ticks = price / increment;
    let snapped_ticks = match side {
        OrderSide::Buy => (ticks + 1e-6).floor(),
        OrderSide::Sell => (ticks - 1e-6).ceil(),
    };
    let snapped = snapped_ticks * increment;
    Some((snapped * 1e10).round() / 1e10)
}

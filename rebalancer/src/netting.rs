//! Net-quantity arithmetic.
//!
//! Pure functions shared by target-book rows and synthesized
//! extra-position rows: derive the target quantity from a dollar
//! allocation, and net it against existing and pending quantities with
//! a minimum-notional floor.

/// Shares (or contracts) implied by a signed USD allocation.
///
/// `fx_rate` is units of local currency per 1 USD; the allocation is
/// converted to local currency, divided by price × multiplier, and
/// floored. The sign follows the allocation.
pub fn target_quantity(
    dollar_allocation: f64,
    limit_price: f64,
    fx_rate: f64,
    multiplier: i64,
) -> i64 {
    if limit_price <= 0.0 || fx_rate <= 0.0 || multiplier <= 0 {
        return 0;
    }
    let local_allocation = dollar_allocation.abs() * fx_rate;
    let qty = (local_allocation / (limit_price * multiplier as f64)).floor() as i64;
    if dollar_allocation < 0.0 { -qty } else { qty }
}

/// Signed quantity still to be ordered.
///
/// `raw = target − round(existing) − round(pending)`. Zero means on
/// target. When price and FX are known and positive, a nonzero raw
/// whose USD notional falls below `min_trade_usd` collapses to zero;
/// otherwise raw is returned as-is.
pub fn net_quantity(
    target: i64,
    existing: f64,
    pending: f64,
    limit_price: Option<f64>,
    fx_rate: Option<f64>,
    multiplier: i64,
    min_trade_usd: f64,
) -> i64 {
    let raw = target - existing.round() as i64 - pending.round() as i64;
    if raw == 0 {
        return 0;
    }

    if let (Some(price), Some(fx)) = (limit_price, fx_rate) {
        if price > 0.0 && fx > 0.0 {
            let usd_notional = raw.abs() as f64 * price * multiplier as f64 / fx;
            if usd_notional < min_trade_usd {
                return 0;
            }
        }
    }

    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- target_quantity ---

    #[test]
    fn target_floors_toward_zero() {
        // $10,000 at $185.30 = 53.96 shares -> 53.
        assert_eq!(target_quantity(10_000.0, 185.30, 1.0, 1), 53);
        assert_eq!(target_quantity(-10_000.0, 185.30, 1.0, 1), -53);
    }

    #[test]
    fn target_converts_through_fx() {
        // $10,000 at 0.92 EUR/USD = EUR 9,200; at EUR 46 -> 200 shares.
        assert_eq!(target_quantity(10_000.0, 46.0, 0.92, 1), 200);
    }

    #[test]
    fn target_applies_option_multiplier() {
        // $50,000 at $5.00 premium x 100 = 100 contracts.
        assert_eq!(target_quantity(50_000.0, 5.0, 1.0, 100), 100);
    }

    #[test]
    fn target_zero_on_degenerate_inputs() {
        assert_eq!(target_quantity(10_000.0, 0.0, 1.0, 1), 0);
        assert_eq!(target_quantity(10_000.0, -5.0, 1.0, 1), 0);
        assert_eq!(target_quantity(10_000.0, 185.0, 0.0, 1), 0);
    }

    // --- net_quantity ---

    #[test]
    fn nets_target_against_existing_and_pending() {
        // Scenario A: target 100, existing 40, pending BUY 20 -> 40.
        assert_eq!(
            net_quantity(100, 40.0, 20.0, Some(185.0), Some(1.0), 1, 100.0),
            40
        );
    }

    #[test]
    fn on_target_is_zero() {
        // Scenario C: target 10, existing 10, no pending.
        assert_eq!(
            net_quantity(10, 10.0, 0.0, Some(185.0), Some(1.0), 1, 100.0),
            0
        );
    }

    #[test]
    fn short_cover_nets_negative() {
        // Scenario B: extra position, target 0, existing +50.
        assert_eq!(
            net_quantity(0, 50.0, 0.0, Some(12.0), Some(1.0), 1, 100.0),
            -50
        );
    }

    #[test]
    fn below_min_notional_collapses_to_zero() {
        // 3 shares at $20 = $60 < $100 floor.
        assert_eq!(
            net_quantity(3, 0.0, 0.0, Some(20.0), Some(1.0), 1, 100.0),
            0
        );
        // At exactly the floor the order survives.
        assert_eq!(
            net_quantity(5, 0.0, 0.0, Some(20.0), Some(1.0), 1, 100.0),
            5
        );
    }

    #[test]
    fn min_notional_converts_through_fx() {
        // 5 shares at EUR 20 with 0.92 EUR/USD = $108.70 USD >= $100.
        assert_eq!(
            net_quantity(5, 0.0, 0.0, Some(20.0), Some(0.92), 1, 100.0),
            5
        );
        // With 1.10 local/USD the same trade is $90.91 < $100.
        assert_eq!(
            net_quantity(5, 0.0, 0.0, Some(20.0), Some(1.10), 1, 100.0),
            0
        );
    }

    #[test]
    fn unknown_price_skips_the_floor() {
        assert_eq!(net_quantity(3, 0.0, 0.0, None, Some(1.0), 1, 100.0), 3);
        assert_eq!(net_quantity(3, 0.0, 0.0, Some(20.0), None, 1, 100.0), 3);
    }

    #[test]
    fn fractional_quantities_round_before_netting() {
        assert_eq!(
            net_quantity(100, 39.6, 20.4, Some(185.0), Some(1.0), 1, 0.0),
            100 - 40 - 20
        );
    }

    #[test]
    fn invariant_floor_or_exact() {
        let cases: [(i64, f64, f64, f64, f64); 3] = [
            (100_i64, 40.0, 20.0, 185.0, 1.0),
            (0, 50.0, -10.0, 12.0, 1.0),
            (7, 0.0, 0.0, 10.0, 0.9),
        ];
        for (t, e, p, price, fx) in cases {
            let raw = t - e.round() as i64 - p.round() as i64;
            let net = net_quantity(t, e, p, Some(price), Some(fx), 1, 100.0);
            let usd = raw.abs() as f64 * price / fx;
            if raw != 0 && usd < 100.0 {
                assert_eq!(net, 0);
            } else {
                assert_eq!(net, raw);
            }
        }
    }
}

//! Price snapping and size trimming (C1).
//!
//! All arithmetic here uses `rust_decimal::Decimal`; venue prices and sizes
//! are decimal strings on the wire, and a float round-trip would silently
//! violate the tick-size and significant-figure invariants tested in §8.

use crate::core::types::Side;
use rust_decimal::{Decimal, RoundingStrategy};

/// Snap `price` to the venue's tick size for a perpetual with `size_decimals`
/// digits of size precision, rounding toward the aggressive side of the
/// book: ceil for buy, floor for sell. The result is capped at five
/// significant figures, reducing decimals (never adding them) until it
/// fits; whole numbers are always allowed regardless of digit count.
pub fn snap_price(price: Decimal, size_decimals: u32, side: Side) -> Decimal {
    let max_decimals = 6u32.saturating_sub(size_decimals);
    let strategy = match side {
        Side::Buy => RoundingStrategy::AwayFromZero,
        Side::Sell => RoundingStrategy::ToZero,
    };
    let mut snapped = price.round_dp_with_strategy(max_decimals, strategy);
    snapped = enforce_sig_figs(snapped, 5, side);
    snapped.normalize()
}

/// Reduce `value`'s decimal places until `digits_before_dot + decimals ≤
/// max_sig_figs`. Integer values are left untouched. Each trim keeps the
/// same away-from-original direction as the initial tick snap — ceil for
/// buy, floor for sell — so further trimming can never cross back over
/// the original price.
fn enforce_sig_figs(value: Decimal, max_sig_figs: u32, side: Side) -> Decimal {
    if value == Decimal::ZERO {
        return value;
    }
    let strategy = match side {
        Side::Buy => RoundingStrategy::AwayFromZero,
        Side::Sell => RoundingStrategy::ToZero,
    };
    let mut current = value;
    loop {
        let scale = current.scale();
        if scale == 0 {
            return current;
        }
        let int_part = current.trunc().abs();
        let digits_before_dot = if int_part == Decimal::ZERO {
            1
        } else {
            int_part.to_string().len() as u32
        };
        if digits_before_dot + scale <= max_sig_figs {
            return current;
        }
        current = current.round_dp_with_strategy(scale - 1, strategy);
    }
}

/// Trim trailing zeros from a decimal's fixed-point string form. A bare
/// trailing dot is stripped; the empty string becomes `"0"`.
pub fn trim_size(value: Decimal) -> String {
    let s = value.normalize().to_string();
    if s.is_empty() {
        "0".to_string()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buy_rounds_up_sell_rounds_down() {
        let buy = snap_price(dec!(2500.12345), 2, Side::Buy);
        let sell = snap_price(dec!(2500.12345), 2, Side::Sell);
        assert!(buy >= dec!(2500.12345));
        assert!(sell <= dec!(2500.12345));
    }

    #[test]
    fn five_sig_figs_enforced() {
        // size_decimals=0 -> max_decimals=6, but 5 sig figs caps it.
        let snapped = snap_price(dec!(12345.6789), 0, Side::Buy);
        let digits: usize = snapped
            .normalize()
            .to_string()
            .chars()
            .filter(|c| c.is_ascii_digit())
            .count();
        assert!(digits <= 5, "got {snapped} with {digits} digits");
    }

    #[test]
    fn sig_fig_trim_never_crosses_the_original_price() {
        // 12345.1 already has <=6 decimals, so the tick-snap pass is a
        // no-op; the 5-sig-fig trim must still round away from the
        // original on a buy (never down) and toward it on a sell (never
        // up), not round-to-nearest.
        let buy = snap_price(dec!(12345.1), 0, Side::Buy);
        assert!(buy >= dec!(12345.1), "buy snap {buy} fell below the original price");

        let sell = snap_price(dec!(12345.1), 0, Side::Sell);
        assert!(sell <= dec!(12345.1), "sell snap {sell} rose above the original price");
    }

    #[test]
    fn integer_outputs_always_allowed() {
        let snapped = snap_price(dec!(123456), 0, Side::Buy);
        assert_eq!(snapped, dec!(123456));
    }

    #[test]
    fn trim_size_strips_trailing_zeros() {
        assert_eq!(trim_size(dec!(1.500000)), "1.5");
        assert_eq!(trim_size(dec!(1.000000)), "1");
        assert_eq!(trim_size(dec!(0)), "0");
    }
}

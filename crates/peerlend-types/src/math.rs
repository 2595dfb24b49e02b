//! Fixed-point helpers shared by the accounting and index math.
//!
//! All amounts, scaled balances, and indexes are `Decimal` with indexes based
//! at `1.0`. Subtraction that could go negative is floored at zero instead of
//! being allowed to underflow.

use rust_decimal::Decimal;

use crate::constants::BPS_FACTOR;

/// `max(0, a - b)` — the engine never lets bookkeeping go negative.
#[must_use]
pub fn zero_floor_sub(a: Decimal, b: Decimal) -> Decimal {
    if a > b { a - b } else { Decimal::ZERO }
}

/// Convert a basis-point value to its decimal fraction (`5_000` → `0.5`).
#[must_use]
pub fn bps(value_bps: u16) -> Decimal {
    Decimal::from(value_bps) / Decimal::from(BPS_FACTOR)
}

/// Weighted average of `x` and `y`, with `weight_bps` applied to `y`:
/// `((BPS - w)·x + w·y) / BPS`.
#[must_use]
pub fn weighted_avg(x: Decimal, y: Decimal, weight_bps: u16) -> Decimal {
    let w = Decimal::from(weight_bps);
    let rest = Decimal::from(BPS_FACTOR - u32::from(weight_bps));
    (rest * x + w * y) / Decimal::from(BPS_FACTOR)
}

/// The `share_bps` fraction of `amount`.
#[must_use]
pub fn percent_of(amount: Decimal, share_bps: u16) -> Decimal {
    amount * bps(share_bps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_floor_sub_floors() {
        assert_eq!(
            zero_floor_sub(Decimal::new(5, 0), Decimal::new(3, 0)),
            Decimal::new(2, 0)
        );
        assert_eq!(
            zero_floor_sub(Decimal::new(3, 0), Decimal::new(5, 0)),
            Decimal::ZERO
        );
        assert_eq!(zero_floor_sub(Decimal::ONE, Decimal::ONE), Decimal::ZERO);
    }

    #[test]
    fn bps_scaling() {
        assert_eq!(bps(10_000), Decimal::ONE);
        assert_eq!(bps(5_000), Decimal::new(5, 1));
        assert_eq!(bps(0), Decimal::ZERO);
    }

    #[test]
    fn weighted_avg_endpoints() {
        let x = Decimal::new(10, 0);
        let y = Decimal::new(20, 0);
        assert_eq!(weighted_avg(x, y, 0), x);
        assert_eq!(weighted_avg(x, y, 10_000), y);
        assert_eq!(weighted_avg(x, y, 5_000), Decimal::new(15, 0));
    }

    #[test]
    fn weighted_avg_of_equal_values_is_exact() {
        // The index math relies on this being exact: blending two identical
        // growth factors must return the value bit-for-bit.
        let g = Decimal::new(1_000_123, 6);
        assert_eq!(weighted_avg(g, g, 3_333), g);
    }

    #[test]
    fn percent_of_amount() {
        assert_eq!(
            percent_of(Decimal::new(200, 0), 5_000),
            Decimal::new(100, 0)
        );
        assert_eq!(percent_of(Decimal::new(200, 0), 0), Decimal::ZERO);
    }
}

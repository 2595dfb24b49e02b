//! Delta, idle-supply, and fee accounting.
//!
//! A side's *delta* is volume promised peer-to-peer but resting unmatched in
//! the pool on the protocol's behalf; it is consumed before the ranking
//! structure is ever touched. *Idle supply* is volume that cannot reach the
//! pool because of the external supply cap; it is owned by the peer-to-peer
//! supply total and consumed only by borrows.
//!
//! All amounts entering these functions are in underlying units; scaled
//! bookkeeping happens here against the market's current indexes. Clamping
//! performed here (cap diversion, zero floors) is design behavior, not an
//! error condition.

use peerlend_types::{Market, Side, math::zero_floor_sub};
use rust_decimal::Decimal;

/// Satisfy `amount` out of the side's pre-existing pool-resting delta.
///
/// Returns `(matched_from_delta, remaining_amount)`.
pub fn match_delta(market: &mut Market, side: Side, amount: Decimal) -> (Decimal, Decimal) {
    let pool_index = market.indexes.side(side).pool_index;
    let delta = market.deltas.side_mut(side);
    if delta.scaled_delta_pool.is_zero() || amount.is_zero() {
        return (Decimal::ZERO, amount);
    }

    let delta_value = delta.scaled_delta_pool * pool_index;
    let matched = delta_value.min(amount);
    delta.scaled_delta_pool = if matched == delta_value {
        Decimal::ZERO
    } else {
        zero_floor_sub(delta.scaled_delta_pool, matched / pool_index)
    };

    tracing::debug!(side = %side, matched = %matched, "Consumed pool-resting delta");
    (matched, amount - matched)
}

/// Grow the side's delta by `amount` — the fallback when a demotion ran out
/// of budget and peer-to-peer volume was left resting in the pool.
pub fn increase_delta(market: &mut Market, side: Side, amount: Decimal) {
    if amount.is_zero() {
        return;
    }
    let pool_index = market.indexes.side(side).pool_index;
    market.deltas.side_mut(side).scaled_delta_pool += amount / pool_index;
    tracing::debug!(side = %side, amount = %amount, "Increased pool-resting delta");
}

/// Serve a borrow out of idle supply first. Returns `(consumed, remaining)`.
pub fn consume_idle(market: &mut Market, amount: Decimal) -> (Decimal, Decimal) {
    let consumed = market.idle_supply.min(amount);
    market.idle_supply -= consumed;
    (consumed, amount - consumed)
}

/// Clamp a pool-bound amount to the externally reported cap headroom,
/// diverting the excess into idle supply instead of failing the operation.
///
/// Returns the amount that may actually reach the pool. `None` headroom
/// means the reserve is uncapped.
pub fn handle_supply_cap(
    market: &mut Market,
    amount: Decimal,
    headroom: Option<Decimal>,
) -> Decimal {
    let Some(headroom) = headroom else {
        return amount;
    };
    let suppliable = amount.min(headroom);
    let excess = amount - suppliable;
    if excess > Decimal::ZERO {
        market.idle_supply += excess;
        tracing::debug!(excess = %excess, "Supply cap reached, diverting to idle");
    }
    suppliable
}

/// Absorb the protocol fee out of a peer-to-peer repay.
///
/// The fee is the excess of what matched borrowers collectively owe over
/// what matched suppliers are collectively owed — rounding and timing can
/// open this gap, and it must be taken by the protocol rather than left as
/// an accounting error. Deducted from the outstanding peer-to-peer borrow
/// total before any promotion. Returns `(fee_absorbed, remaining_amount)`.
pub fn repay_fee(market: &mut Market, amount: Decimal) -> (Decimal, Decimal) {
    if amount.is_zero() {
        return (Decimal::ZERO, amount);
    }
    let fee = market.fee_outstanding().min(amount);
    if fee.is_zero() {
        return (Decimal::ZERO, amount);
    }
    let p2p_index = market.indexes.borrow.p2p_index;
    market.deltas.borrow.scaled_total_p2p =
        zero_floor_sub(market.deltas.borrow.scaled_total_p2p, fee / p2p_index);

    tracing::debug!(fee = %fee, "Absorbed protocol fee from repay");
    (fee, amount - fee)
}

/// Record new peer-to-peer volume after a supply/borrow matched.
///
/// `side` is the side receiving the new balance; `total` is the full matched
/// amount (delta + promoted + idle-parked); `promoted` is the portion that
/// moved counterparties out of the pool — only that portion is new volume on
/// the opposite side, the rest was already promised there.
///
/// Returns the scaled increase to credit the user's peer-to-peer bucket.
pub fn increase_p2p_totals(
    market: &mut Market,
    side: Side,
    promoted: Decimal,
    total: Decimal,
) -> Decimal {
    if total.is_zero() {
        return Decimal::ZERO;
    }
    let scaled_increase = total / market.indexes.side(side).p2p_index;
    market.deltas.side_mut(side).scaled_total_p2p += scaled_increase;

    if promoted > Decimal::ZERO {
        let opposite = side.opposite();
        let scaled_promoted = promoted / market.indexes.side(opposite).p2p_index;
        market.deltas.side_mut(opposite).scaled_total_p2p += scaled_promoted;
    }
    scaled_increase
}

/// Record peer-to-peer volume leaving after a repay/withdraw.
///
/// `side` is the side being exited; `total` is the exited volume that found
/// no replacement through promotion (delta-matched plus the demote/fallback
/// remainder); `demoted` is the opposite-side volume actually demoted —
/// budget shortfall stays peer-to-peer behind the side's delta.
pub fn decrease_p2p_totals(market: &mut Market, side: Side, demoted: Decimal, total: Decimal) {
    if total > Decimal::ZERO {
        let p2p_index = market.indexes.side(side).p2p_index;
        let delta = market.deltas.side_mut(side);
        delta.scaled_total_p2p = zero_floor_sub(delta.scaled_total_p2p, total / p2p_index);
    }
    if demoted > Decimal::ZERO {
        let opposite = side.opposite();
        let p2p_index = market.indexes.side(opposite).p2p_index;
        let delta = market.deltas.side_mut(opposite);
        delta.scaled_total_p2p = zero_floor_sub(delta.scaled_total_p2p, demoted / p2p_index);
    }
}

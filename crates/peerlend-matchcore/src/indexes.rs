//! The interest-index engine.
//!
//! Peer-to-peer indexes grow at a blended rate between the pool's supply and
//! borrow growth, positioned by the market's index cursor and spread by its
//! reserve factor. The portion of peer-to-peer volume actually resting in
//! the pool (the delta) grows at the pool rate instead, and idle supply
//! grows not at all — both proportions are blended into the index update.
//!
//! Updates are lazy: [`refresh_indexes`] runs at most once per distinct
//! timestamp, and recomputation against unchanged pool indexes is an exact
//! identity.

use chrono::{DateTime, Utc};
use peerlend_types::{
    Market, MarketSideIndexes, PoolIndexes,
    math::{percent_of, weighted_avg, zero_floor_sub},
};
use rust_decimal::Decimal;

/// Growth ratios since the last refresh, per side and placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthFactors {
    pub pool_supply: Decimal,
    pub pool_borrow: Decimal,
    pub p2p_supply: Decimal,
    pub p2p_borrow: Decimal,
}

/// Compute growth factors from the pool's index movement.
///
/// Normal case (`pool supply growth ≤ pool borrow growth`): the blended
/// peer-to-peer growth sits `cursor` of the way from supply to borrow
/// growth, and the reserve factor claws back a share of each side's spread
/// against its pool rate.
///
/// Inverted case (an anomaly, e.g. external rate manipulation): both
/// peer-to-peer growth factors clamp to the pool borrow growth, so
/// peer-to-peer suppliers never outgrow pool borrowers.
#[must_use]
pub fn compute_growth_factors(
    current: PoolIndexes,
    last: PoolIndexes,
    p2p_index_cursor_bps: u16,
    reserve_factor_bps: u16,
) -> GrowthFactors {
    let pool_supply = current.supply / last.supply;
    let pool_borrow = current.borrow / last.borrow;

    if pool_supply <= pool_borrow {
        let p2p_growth = weighted_avg(pool_supply, pool_borrow, p2p_index_cursor_bps);
        GrowthFactors {
            pool_supply,
            pool_borrow,
            p2p_supply: p2p_growth - percent_of(p2p_growth - pool_supply, reserve_factor_bps),
            p2p_borrow: p2p_growth + percent_of(pool_borrow - p2p_growth, reserve_factor_bps),
        }
    } else {
        GrowthFactors {
            pool_supply,
            pool_borrow,
            p2p_supply: pool_borrow,
            p2p_borrow: pool_borrow,
        }
    }
}

/// Advance one side's peer-to-peer index.
///
/// The delta proportion is capped at `1 − idle proportion` so the blend
/// weights never sum past 1 under rounding. `proportion_idle` is always zero
/// for the borrow side.
#[must_use]
pub fn compute_p2p_index(
    pool_growth: Decimal,
    p2p_growth: Decimal,
    last: &MarketSideIndexes,
    scaled_delta: Decimal,
    scaled_total_p2p: Decimal,
    proportion_idle: Decimal,
) -> Decimal {
    if scaled_total_p2p.is_zero() || (scaled_delta.is_zero() && proportion_idle.is_zero()) {
        return last.p2p_index * p2p_growth;
    }

    let proportion_delta = if scaled_delta.is_zero() {
        Decimal::ZERO
    } else {
        ((scaled_delta * last.pool_index) / (scaled_total_p2p * last.p2p_index))
            .min(Decimal::ONE - proportion_idle)
    };

    let p2p_weight = zero_floor_sub(Decimal::ONE, proportion_delta + proportion_idle);
    last.p2p_index * (p2p_growth * p2p_weight + pool_growth * proportion_delta + proportion_idle)
}

/// Refresh a market's four indexes to the current time.
///
/// No-op (returns `false`) when `now` is not past the market's last update —
/// multiple operations within one timestamp reuse the already-computed
/// indexes.
pub fn refresh_indexes(market: &mut Market, pool: PoolIndexes, now: DateTime<Utc>) -> bool {
    if now <= market.last_update {
        return false;
    }

    let growth = compute_growth_factors(
        pool,
        market.indexes.pool(),
        market.params.p2p_index_cursor_bps,
        market.params.reserve_factor_bps,
    );

    let supply_p2p = compute_p2p_index(
        growth.pool_supply,
        growth.p2p_supply,
        &market.indexes.supply,
        market.deltas.supply.scaled_delta_pool,
        market.deltas.supply.scaled_total_p2p,
        market.proportion_idle(),
    );
    let borrow_p2p = compute_p2p_index(
        growth.pool_borrow,
        growth.p2p_borrow,
        &market.indexes.borrow,
        market.deltas.borrow.scaled_delta_pool,
        market.deltas.borrow.scaled_total_p2p,
        Decimal::ZERO,
    );

    market.indexes.supply = MarketSideIndexes {
        pool_index: pool.supply,
        p2p_index: supply_p2p,
    };
    market.indexes.borrow = MarketSideIndexes {
        pool_index: pool.borrow,
        p2p_index: borrow_p2p,
    };
    market.last_update = now;

    tracing::debug!(
        underlying = %market.underlying,
        supply_p2p = %supply_p2p,
        borrow_p2p = %borrow_p2p,
        "Refreshed market indexes"
    );
    true
}

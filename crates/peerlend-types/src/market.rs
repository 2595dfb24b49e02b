//! The per-market record: indexes, deltas, idle supply, and pause flags.
//!
//! Scaled-balance convention: a position is stored as `balance ÷ index` at
//! recording time, so its current value is always `scaled × current index`.
//! Indexes are based at `1.0` and only ever grow.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::MarketParams;
use crate::ids::Asset;
use crate::math::zero_floor_sub;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// The two sides of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Supply,
    Borrow,
}

impl Side {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Supply => Self::Borrow,
            Self::Borrow => Self::Supply,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supply => write!(f, "supply"),
            Self::Borrow => write!(f, "borrow"),
        }
    }
}

// ---------------------------------------------------------------------------
// Indexes
// ---------------------------------------------------------------------------

/// The pool-side index pair, as read from the underlying pooled market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolIndexes {
    pub supply: Decimal,
    pub borrow: Decimal,
}

impl PoolIndexes {
    /// Both indexes at base value `1.0` (a freshly created pool reserve).
    #[must_use]
    pub fn one() -> Self {
        Self {
            supply: Decimal::ONE,
            borrow: Decimal::ONE,
        }
    }
}

/// Pool and peer-to-peer indexes for one side of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSideIndexes {
    pub pool_index: Decimal,
    pub p2p_index: Decimal,
}

/// All four indexes of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indexes {
    pub supply: MarketSideIndexes,
    pub borrow: MarketSideIndexes,
}

impl Indexes {
    #[must_use]
    pub fn side(&self, side: Side) -> &MarketSideIndexes {
        match side {
            Side::Supply => &self.supply,
            Side::Borrow => &self.borrow,
        }
    }

    /// The pool half of the index set.
    #[must_use]
    pub fn pool(&self) -> PoolIndexes {
        PoolIndexes {
            supply: self.supply.pool_index,
            borrow: self.borrow.pool_index,
        }
    }
}

// ---------------------------------------------------------------------------
// Deltas
// ---------------------------------------------------------------------------

/// Delta bookkeeping for one side of a market.
///
/// `scaled_delta_pool` is liquidity promised peer-to-peer but currently
/// resting in the pool (scaled by the side's *pool* index).
/// `scaled_total_p2p` is the side's total peer-to-peer volume (scaled by the
/// side's *p2p* index).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSideDelta {
    pub scaled_delta_pool: Decimal,
    pub scaled_total_p2p: Decimal,
}

/// Both sides' delta bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deltas {
    pub supply: MarketSideDelta,
    pub borrow: MarketSideDelta,
}

impl Deltas {
    #[must_use]
    pub fn side(&self, side: Side) -> &MarketSideDelta {
        match side {
            Side::Supply => &self.supply,
            Side::Borrow => &self.borrow,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut MarketSideDelta {
        match side {
            Side::Supply => &mut self.supply,
            Side::Borrow => &mut self.borrow,
        }
    }
}

// ---------------------------------------------------------------------------
// Pause flags
// ---------------------------------------------------------------------------

/// Per-operation pause flags plus matching/deprecation switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseStatuses {
    pub supply: bool,
    pub supply_collateral: bool,
    pub borrow: bool,
    pub repay: bool,
    pub withdraw: bool,
    pub withdraw_collateral: bool,
    pub liquidate: bool,
    /// When set, new volume routes pool-direct instead of matching.
    pub p2p_disabled: bool,
    /// Deprecated markets refuse new borrows and allow full-close liquidation.
    pub deprecated: bool,
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// The persisted per-market record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub underlying: Asset,
    pub params: MarketParams,
    pub indexes: Indexes,
    pub last_update: DateTime<Utc>,
    pub pause: PauseStatuses,
    pub deltas: Deltas,
    /// Supplied liquidity that cannot reach the pool because of the external
    /// supply cap. Owned by the peer-to-peer supply total; earns nothing.
    pub idle_supply: Decimal,
}

impl Market {
    /// Create a market with peer-to-peer indexes seeded from the pool's.
    #[must_use]
    pub fn new(
        underlying: impl Into<Asset>,
        params: MarketParams,
        pool: PoolIndexes,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            underlying: underlying.into(),
            params,
            indexes: Indexes {
                supply: MarketSideIndexes {
                    pool_index: pool.supply,
                    p2p_index: pool.supply,
                },
                borrow: MarketSideIndexes {
                    pool_index: pool.borrow,
                    p2p_index: pool.borrow,
                },
            },
            last_update: now,
            pause: PauseStatuses::default(),
            deltas: Deltas::default(),
            idle_supply: Decimal::ZERO,
        }
    }

    /// Total value promised to peer-to-peer suppliers.
    #[must_use]
    pub fn p2p_supply_value(&self) -> Decimal {
        self.deltas.supply.scaled_total_p2p * self.indexes.supply.p2p_index
    }

    /// Total value owed by peer-to-peer borrowers (gross of the delta).
    #[must_use]
    pub fn p2p_borrow_value(&self) -> Decimal {
        self.deltas.borrow.scaled_total_p2p * self.indexes.borrow.p2p_index
    }

    /// Peer-to-peer borrow value net of the borrow delta resting in the pool.
    #[must_use]
    pub fn p2p_borrow_value_net_of_delta(&self) -> Decimal {
        zero_floor_sub(
            self.p2p_borrow_value(),
            self.deltas.borrow.scaled_delta_pool * self.indexes.borrow.pool_index,
        )
    }

    /// The protocol fee currently claimable: the excess of what matched
    /// borrowers owe over what matched suppliers are owed. Never negative.
    #[must_use]
    pub fn fee_outstanding(&self) -> Decimal {
        zero_floor_sub(self.p2p_borrow_value_net_of_delta(), self.p2p_supply_value())
    }

    /// Share of the peer-to-peer supply total backed by idle cash, in
    /// `[0, 1]`. Always zero on the borrow side.
    #[must_use]
    pub fn proportion_idle(&self) -> Decimal {
        if self.idle_supply.is_zero() {
            return Decimal::ZERO;
        }
        let total = self.p2p_supply_value();
        if total.is_zero() {
            return Decimal::ZERO;
        }
        (self.idle_supply / total).min(Decimal::ONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_market() -> Market {
        Market::new(
            "USDC",
            MarketParams::default(),
            PoolIndexes::one(),
            Utc::now(),
        )
    }

    #[test]
    fn new_market_seeds_p2p_indexes_from_pool() {
        let pool = PoolIndexes {
            supply: Decimal::new(105, 2),
            borrow: Decimal::new(110, 2),
        };
        let market = Market::new("USDC", MarketParams::default(), pool, Utc::now());
        assert_eq!(market.indexes.supply.p2p_index, pool.supply);
        assert_eq!(market.indexes.borrow.p2p_index, pool.borrow);
        assert_eq!(market.indexes.pool(), pool);
    }

    #[test]
    fn fresh_market_has_no_fee_and_no_idle() {
        let market = fresh_market();
        assert_eq!(market.fee_outstanding(), Decimal::ZERO);
        assert_eq!(market.proportion_idle(), Decimal::ZERO);
        assert_eq!(market.idle_supply, Decimal::ZERO);
    }

    #[test]
    fn fee_outstanding_is_borrow_minus_supply() {
        let mut market = fresh_market();
        market.deltas.borrow.scaled_total_p2p = Decimal::new(1_000, 0);
        market.deltas.supply.scaled_total_p2p = Decimal::new(990, 0);
        assert_eq!(market.fee_outstanding(), Decimal::new(10, 0));

        // Borrow delta reduces the claimable fee.
        market.deltas.borrow.scaled_delta_pool = Decimal::new(10, 0);
        assert_eq!(market.fee_outstanding(), Decimal::ZERO);
    }

    #[test]
    fn proportion_idle_capped_at_one() {
        let mut market = fresh_market();
        market.deltas.supply.scaled_total_p2p = Decimal::new(100, 0);
        market.idle_supply = Decimal::new(250, 0);
        assert_eq!(market.proportion_idle(), Decimal::ONE);

        market.idle_supply = Decimal::new(25, 0);
        assert_eq!(market.proportion_idle(), Decimal::new(25, 2));
    }

    #[test]
    fn side_accessors() {
        let mut deltas = Deltas::default();
        deltas.side_mut(Side::Borrow).scaled_delta_pool = Decimal::ONE;
        assert_eq!(deltas.side(Side::Borrow).scaled_delta_pool, Decimal::ONE);
        assert_eq!(deltas.side(Side::Supply).scaled_delta_pool, Decimal::ZERO);
        assert_eq!(Side::Supply.opposite(), Side::Borrow);
    }

    #[test]
    fn market_serde_roundtrip() {
        let market = fresh_market();
        let json = serde_json::to_string(&market).unwrap();
        let back: Market = serde_json::from_str(&json).unwrap();
        assert_eq!(back.underlying, "USDC");
        assert_eq!(back.indexes, market.indexes);
        assert_eq!(back.deltas, market.deltas);
    }
}

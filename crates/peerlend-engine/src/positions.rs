//! Per-market state and per-user membership sets.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use peerlend_matchcore::MarketBalances;
use peerlend_types::{Asset, Market, MarketParams, PoolIndexes};

/// One market's full state: the persisted market record plus every user's
/// ranked balances in it.
#[derive(Debug, Clone)]
pub struct MarketState {
    pub market: Market,
    pub balances: MarketBalances,
}

impl MarketState {
    #[must_use]
    pub fn new(
        underlying: impl Into<Asset>,
        params: MarketParams,
        pool: PoolIndexes,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            market: Market::new(underlying, params, pool, now),
            balances: MarketBalances::new(),
        }
    }
}

/// The markets a user participates in, kept to bound health-factor
/// computation to relevant markets only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    /// Markets where the user holds collateral.
    pub collateral: BTreeSet<Asset>,
    /// Markets where the user holds a borrow position.
    pub borrowed: BTreeSet<Asset>,
}

impl Membership {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collateral.is_empty() && self.borrowed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use peerlend_types::UserId;

    use super::*;

    #[test]
    fn market_state_starts_empty() {
        let state = MarketState::new(
            "USDC",
            MarketParams::default(),
            PoolIndexes::one(),
            Utc::now(),
        );
        assert_eq!(state.market.underlying, "USDC");
        assert!(state.balances.is_empty_for(&UserId::new()));
    }

    #[test]
    fn membership_tracks_both_sets() {
        let mut membership = Membership::default();
        assert!(membership.is_empty());
        membership.collateral.insert("WETH".to_string());
        membership.borrowed.insert("USDC".to_string());
        assert!(!membership.is_empty());
        assert!(membership.collateral.contains("WETH"));
    }
}

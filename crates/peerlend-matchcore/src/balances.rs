//! Per-market position store.
//!
//! The four rankings (pool/p2p × supply/borrow) **are** the balance store:
//! a user's scaled balance in a bucket is their ranking entry. A raw scaled
//! collateral map sits beside them — collateral never participates in
//! peer-to-peer matching and accrues at the pool supply index.

use std::collections::HashMap;

use peerlend_types::{MarketSideIndexes, UserId, math::zero_floor_sub};
use rust_decimal::Decimal;

use crate::ranking::BalanceRanking;

/// All user balances of one market.
#[derive(Debug, Clone, Default)]
pub struct MarketBalances {
    pub(crate) pool_suppliers: BalanceRanking,
    pub(crate) p2p_suppliers: BalanceRanking,
    pub(crate) pool_borrowers: BalanceRanking,
    pub(crate) p2p_borrowers: BalanceRanking,
    collateral: HashMap<UserId, Decimal>,
}

impl MarketBalances {
    /// Create an empty balance store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =================================================================
    // Scaled bucket accessors
    // =================================================================

    #[must_use]
    pub fn scaled_pool_supply(&self, user: &UserId) -> Decimal {
        self.pool_suppliers.value_of(user)
    }

    #[must_use]
    pub fn scaled_p2p_supply(&self, user: &UserId) -> Decimal {
        self.p2p_suppliers.value_of(user)
    }

    #[must_use]
    pub fn scaled_pool_borrow(&self, user: &UserId) -> Decimal {
        self.pool_borrowers.value_of(user)
    }

    #[must_use]
    pub fn scaled_p2p_borrow(&self, user: &UserId) -> Decimal {
        self.p2p_borrowers.value_of(user)
    }

    #[must_use]
    pub fn scaled_collateral(&self, user: &UserId) -> Decimal {
        self.collateral.get(user).copied().unwrap_or(Decimal::ZERO)
    }

    // =================================================================
    // Scaled bucket updates (zero removes the ranking entry)
    // =================================================================

    pub fn set_pool_supply(&mut self, user: UserId, value: Decimal) {
        self.pool_suppliers.upsert(user, value);
    }

    pub fn set_p2p_supply(&mut self, user: UserId, value: Decimal) {
        self.p2p_suppliers.upsert(user, value);
    }

    pub fn set_pool_borrow(&mut self, user: UserId, value: Decimal) {
        self.pool_borrowers.upsert(user, value);
    }

    pub fn set_p2p_borrow(&mut self, user: UserId, value: Decimal) {
        self.p2p_borrowers.upsert(user, value);
    }

    pub fn increase_collateral(&mut self, user: UserId, scaled_amount: Decimal) {
        *self.collateral.entry(user).or_insert(Decimal::ZERO) += scaled_amount;
    }

    /// Decrease a user's scaled collateral, flooring at zero and dropping
    /// empty entries.
    pub fn decrease_collateral(&mut self, user: UserId, scaled_amount: Decimal) {
        let remaining = zero_floor_sub(self.scaled_collateral(&user), scaled_amount);
        if remaining.is_zero() {
            self.collateral.remove(&user);
        } else {
            self.collateral.insert(user, remaining);
        }
    }

    // =================================================================
    // Value queries
    // =================================================================

    /// The user's total supply balance value at the given side indexes.
    #[must_use]
    pub fn supply_balance(&self, user: &UserId, indexes: &MarketSideIndexes) -> Decimal {
        self.scaled_pool_supply(user) * indexes.pool_index
            + self.scaled_p2p_supply(user) * indexes.p2p_index
    }

    /// The user's total borrow balance value at the given side indexes.
    #[must_use]
    pub fn borrow_balance(&self, user: &UserId, indexes: &MarketSideIndexes) -> Decimal {
        self.scaled_pool_borrow(user) * indexes.pool_index
            + self.scaled_p2p_borrow(user) * indexes.p2p_index
    }

    /// The user's collateral value at the pool supply index.
    #[must_use]
    pub fn collateral_balance(&self, user: &UserId, pool_supply_index: Decimal) -> Decimal {
        self.scaled_collateral(user) * pool_supply_index
    }

    /// Whether the user holds anything in this market.
    #[must_use]
    pub fn is_empty_for(&self, user: &UserId) -> bool {
        self.scaled_pool_supply(user).is_zero()
            && self.scaled_p2p_supply(user).is_zero()
            && self.scaled_pool_borrow(user).is_zero()
            && self.scaled_p2p_borrow(user).is_zero()
            && self.scaled_collateral(user).is_zero()
    }
}

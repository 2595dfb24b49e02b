//! In-memory collaborators used by the test suites.
//!
//! `MockPool` records every call it receives and lets tests steer indexes,
//! reserve configuration, and failure injection; `MockOracle` serves fixed
//! prices; `RecordingRewards` captures reward notifications.

use std::collections::HashMap;

use peerlend_types::{Asset, PeerlendError, PoolIndexes, Result, UserId};
use rust_decimal::Decimal;

use crate::oracle::PriceOracle;
use crate::pool::{LendingPool, ReserveData};
use crate::rewards::RewardTracker;

/// One recorded pool interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolCall {
    Supply(Asset, Decimal),
    Withdraw(Asset, Decimal),
    Borrow(Asset, Decimal),
    Repay(Asset, Decimal),
}

/// A scripted in-memory pool.
#[derive(Debug, Default)]
pub struct MockPool {
    indexes: HashMap<Asset, PoolIndexes>,
    reserves: HashMap<Asset, ReserveData>,
    total_supplied: HashMap<Asset, Decimal>,
    calls: Vec<PoolCall>,
    fail_next: bool,
}

impl MockPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_indexes(&mut self, asset: &str, indexes: PoolIndexes) {
        self.indexes.insert(asset.to_string(), indexes);
    }

    pub fn set_reserve(&mut self, asset: &str, reserve: ReserveData) {
        self.reserves.insert(asset.to_string(), reserve);
    }

    pub fn set_total_supplied(&mut self, asset: &str, total: Decimal) {
        self.total_supplied.insert(asset.to_string(), total);
    }

    /// Make the next pool call fail (then clear the flag).
    pub fn fail_next_call(&mut self) {
        self.fail_next = true;
    }

    #[must_use]
    pub fn calls(&self) -> &[PoolCall] {
        &self.calls
    }

    fn record(&mut self, call: PoolCall) -> Result<()> {
        if self.fail_next {
            self.fail_next = false;
            return Err(PeerlendError::PoolOperationFailed {
                reason: "injected failure".to_string(),
            });
        }
        self.calls.push(call);
        Ok(())
    }
}

impl LendingPool for MockPool {
    fn supply(&mut self, asset: &str, amount: Decimal) -> Result<()> {
        self.record(PoolCall::Supply(asset.to_string(), amount))?;
        *self
            .total_supplied
            .entry(asset.to_string())
            .or_insert(Decimal::ZERO) += amount;
        Ok(())
    }

    fn withdraw(&mut self, asset: &str, amount: Decimal) -> Result<()> {
        self.record(PoolCall::Withdraw(asset.to_string(), amount))?;
        let total = self
            .total_supplied
            .entry(asset.to_string())
            .or_insert(Decimal::ZERO);
        *total = peerlend_types::math::zero_floor_sub(*total, amount);
        Ok(())
    }

    fn borrow(&mut self, asset: &str, amount: Decimal) -> Result<()> {
        self.record(PoolCall::Borrow(asset.to_string(), amount))
    }

    fn repay(&mut self, asset: &str, amount: Decimal) -> Result<()> {
        self.record(PoolCall::Repay(asset.to_string(), amount))
    }

    fn indexes(&self, asset: &str) -> PoolIndexes {
        self.indexes
            .get(asset)
            .copied()
            .unwrap_or_else(PoolIndexes::one)
    }

    fn reserve(&self, asset: &str) -> ReserveData {
        self.reserves.get(asset).copied().unwrap_or(ReserveData {
            supply_cap: None,
            ltv_bps: 8_000,
            liquidation_threshold_bps: 8_500,
            liquidation_bonus_bps: 500,
            decimals: 18,
        })
    }

    fn total_supplied(&self, asset: &str) -> Decimal {
        self.total_supplied
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Fixed-price oracle; unset assets price at `1.0`.
#[derive(Debug, Default)]
pub struct MockOracle {
    prices: HashMap<Asset, Decimal>,
}

impl MockOracle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&mut self, asset: &str, price: Decimal) {
        self.prices.insert(asset.to_string(), price);
    }
}

impl PriceOracle for MockOracle {
    fn price(&self, asset: &str) -> Result<Decimal> {
        let price = self.prices.get(asset).copied().unwrap_or(Decimal::ONE);
        if price.is_zero() {
            return Err(PeerlendError::PriceUnavailable(asset.to_string()));
        }
        Ok(price)
    }
}

/// Captures every reward notification for assertions.
#[derive(Debug, Default)]
pub struct RecordingRewards {
    pub events: Vec<(UserId, Asset, Decimal)>,
}

impl RecordingRewards {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RewardTracker for RecordingRewards {
    fn on_pool_balance_change(
        &mut self,
        user: UserId,
        asset: &str,
        previous_pool_balance: Decimal,
    ) {
        self.events.push((user, asset.to_string(), previous_pool_balance));
    }
}

//! The pooled lending market collaborator.
//!
//! The engine only *consumes* the pool: it forwards residual amounts,
//! repays/withdraws on behalf of matched counterparties, and reads the
//! pool's indexes and reserve configuration. It never implements pool
//! semantics itself.

use peerlend_types::{PoolIndexes, Result};
use rust_decimal::Decimal;

/// Reserve configuration reported by the pool for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveData {
    /// Maximum total supply the pool accepts, in underlying units.
    /// `None` means uncapped.
    pub supply_cap: Option<Decimal>,
    /// Loan-to-value: the share of collateral value that may be borrowed.
    pub ltv_bps: u16,
    /// Liquidation threshold: the share of collateral value counted toward
    /// the health factor.
    pub liquidation_threshold_bps: u16,
    /// Bonus granted to liquidators on seized collateral.
    pub liquidation_bonus_bps: u16,
    /// Token decimals, used to round seized amounts to representable units.
    pub decimals: u32,
}

/// The underlying pooled lending market.
///
/// Each call is expected to be transactional on the pool side: once the
/// engine has validated an operation, a pool rejection rolls back the
/// engine's internal state for that operation.
pub trait LendingPool {
    fn supply(&mut self, asset: &str, amount: Decimal) -> Result<()>;
    fn withdraw(&mut self, asset: &str, amount: Decimal) -> Result<()>;
    fn borrow(&mut self, asset: &str, amount: Decimal) -> Result<()>;
    fn repay(&mut self, asset: &str, amount: Decimal) -> Result<()>;

    /// Current pool supply/borrow indexes for the asset.
    fn indexes(&self, asset: &str) -> PoolIndexes;

    /// Reserve configuration for the asset.
    fn reserve(&self, asset: &str) -> ReserveData;

    /// Current total supplied to the reserve, for supply-cap headroom.
    fn total_supplied(&self, asset: &str) -> Decimal;
}

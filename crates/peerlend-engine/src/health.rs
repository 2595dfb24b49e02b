//! Health-factor computation over a user's membership markets.
//!
//! The health factor is the ratio of the maximum debt the user's collateral
//! supports (at the liquidation threshold) to their actual debt. Borrowing
//! power uses the stricter loan-to-value share instead.

use std::collections::HashMap;

use peerlend_types::{Asset, PeerlendError, Result, UserId, math::percent_of};
use rust_decimal::Decimal;

use crate::oracle::PriceOracle;
use crate::pool::LendingPool;
use crate::positions::{MarketState, Membership};

/// A user's aggregate position values in the common base currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidityData {
    /// Maximum debt the user may take on (collateral × LTV).
    pub borrowable: Decimal,
    /// Maximum debt before liquidation (collateral × liquidation threshold).
    pub max_debt: Decimal,
    /// Current debt.
    pub debt: Decimal,
}

impl LiquidityData {
    /// `max_debt / debt`; `Decimal::MAX` with no debt.
    #[must_use]
    pub fn health_factor(&self) -> Decimal {
        if self.debt.is_zero() {
            Decimal::MAX
        } else {
            self.max_debt / self.debt
        }
    }

    /// Whether the position is above the liquidation bar.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.debt <= self.max_debt
    }
}

/// Aggregate a user's collateral and debt across their membership markets.
pub fn compute_liquidity_data<P: LendingPool, O: PriceOracle>(
    markets: &HashMap<Asset, MarketState>,
    membership: &Membership,
    user: &UserId,
    pool: &P,
    oracle: &O,
) -> Result<LiquidityData> {
    let mut borrowable = Decimal::ZERO;
    let mut max_debt = Decimal::ZERO;
    let mut debt = Decimal::ZERO;

    for underlying in &membership.collateral {
        let Some(state) = markets.get(underlying) else {
            continue;
        };
        let price = oracle.price(underlying)?;
        let reserve = pool.reserve(underlying);
        let balance = state
            .balances
            .collateral_balance(user, state.market.indexes.supply.pool_index);
        let value = balance
            .checked_mul(price)
            .ok_or(PeerlendError::ArithmeticOverflow {
                context: "collateral value",
            })?;
        borrowable += percent_of(value, reserve.ltv_bps);
        max_debt += percent_of(value, reserve.liquidation_threshold_bps);
    }

    for underlying in &membership.borrowed {
        let Some(state) = markets.get(underlying) else {
            continue;
        };
        let price = oracle.price(underlying)?;
        let balance = state
            .balances
            .borrow_balance(user, &state.market.indexes.borrow);
        debt += balance
            .checked_mul(price)
            .ok_or(PeerlendError::ArithmeticOverflow {
                context: "debt value",
            })?;
    }

    Ok(LiquidityData {
        borrowable,
        max_debt,
        debt,
    })
}

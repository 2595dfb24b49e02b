//! The position orchestrator.
//!
//! `PeerLendEngine` sequences each operation: refresh indexes, validate,
//! drive delta accounting and the matching engine, adjust idle supply, and
//! forward the final splits to the pool. Operations are all-or-nothing —
//! validation precedes mutation, and any error after mutation begins
//! restores a pre-operation snapshot of the touched market state and
//! membership entries.
//!
//! Index refresh is the one deliberate exception to rollback: it is
//! idempotent and value-preserving, and identical to what any other
//! operation at the same timestamp would have written.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use peerlend_matchcore::{accounting, matching, refresh_indexes};
use peerlend_types::{
    Asset, BorrowReceipt, EngineConfig, LiquidateReceipt, Market, MarketParams, PauseStatuses,
    PeerlendError, RepayReceipt, Result, Side, SupplyReceipt, UserId, WithdrawReceipt,
    constants::{DEFAULT_CLOSE_FACTOR_BPS, FULL_CLOSE_HEALTH_FACTOR_BPS, MAX_CLOSE_FACTOR_BPS},
    math::{bps, percent_of, zero_floor_sub},
};
use rust_decimal::Decimal;

use crate::health::{self, LiquidityData};
use crate::oracle::PriceOracle;
use crate::pool::LendingPool;
use crate::positions::{MarketState, Membership};
use crate::rewards::RewardTracker;

/// Pool calls an operation resolved to, applied after internal accounting.
#[derive(Debug, Clone, Copy, Default)]
struct PoolDirectives {
    repay: Decimal,
    supply: Decimal,
    withdraw: Decimal,
    borrow: Decimal,
}

/// A pool-side balance change pending reward notification:
/// `(user, previous scaled pool balance)`.
type RewardNote = (UserId, Decimal);

/// Pre-operation state of the touched markets and membership entries.
struct Snapshot {
    markets: Vec<(Asset, MarketState)>,
    memberships: Vec<(UserId, Option<Membership>)>,
}

/// The peer-to-peer lending overlay engine.
pub struct PeerLendEngine<P, O, R> {
    config: EngineConfig,
    pool: P,
    oracle: O,
    rewards: R,
    markets: HashMap<Asset, MarketState>,
    memberships: HashMap<UserId, Membership>,
    /// `(owner, manager)` pairs allowed to act on the owner's positions.
    managers: HashSet<(UserId, UserId)>,
}

impl<P: LendingPool, O: PriceOracle, R: RewardTracker> PeerLendEngine<P, O, R> {
    #[must_use]
    pub fn new(config: EngineConfig, pool: P, oracle: O, rewards: R) -> Self {
        Self {
            config,
            pool,
            oracle,
            rewards,
            markets: HashMap::new(),
            memberships: HashMap::new(),
            managers: HashSet::new(),
        }
    }

    // =================================================================
    // Market administration
    // =================================================================

    /// Create a market, seeding its indexes from the pool's.
    pub fn create_market(&mut self, underlying: &str, params: MarketParams) -> Result<()> {
        params.validate()?;
        if self.markets.contains_key(underlying) {
            return Err(PeerlendError::MarketAlreadyCreated(underlying.to_string()));
        }
        let state = MarketState::new(underlying, params, self.pool.indexes(underlying), Utc::now());
        self.markets.insert(underlying.to_string(), state);
        tracing::info!(underlying, "Market created");
        Ok(())
    }

    /// Replace a market's pause flags.
    pub fn set_pause_statuses(&mut self, underlying: &str, pause: PauseStatuses) -> Result<()> {
        let state = self.market_state_mut(underlying)?;
        state.market.pause = pause;
        Ok(())
    }

    /// Grant or revoke a manager's right to act on the owner's positions.
    pub fn approve_manager(&mut self, owner: UserId, manager: UserId, approved: bool) {
        if approved {
            self.managers.insert((owner, manager));
        } else {
            self.managers.remove(&(owner, manager));
        }
    }

    /// Whether `caller` may act on `owner`'s positions.
    #[must_use]
    pub fn is_manager(&self, owner: UserId, caller: UserId) -> bool {
        owner == caller || self.managers.contains(&(owner, caller))
    }

    /// Refresh a market's indexes to the current time. Lazy: at most one
    /// recomputation per distinct timestamp.
    pub fn update_indexes(&mut self, underlying: &str) -> Result<()> {
        let pool_indexes = self.pool.indexes(underlying);
        let state = self.market_state_mut(underlying)?;
        refresh_indexes(&mut state.market, pool_indexes, Utc::now());
        Ok(())
    }

    // =================================================================
    // Operations
    // =================================================================

    /// Supply `amount` for `on_behalf`: consume the borrow-side delta,
    /// promote waiting borrowers, and forward the residual to the pool.
    pub fn supply(
        &mut self,
        underlying: &str,
        amount: Decimal,
        on_behalf: UserId,
        budget: Option<u32>,
    ) -> Result<SupplyReceipt> {
        if amount.is_zero() {
            return Err(PeerlendError::AmountIsZero);
        }
        self.update_indexes(underlying)?;
        self.ensure_not_paused(underlying, "supply", |pause| pause.supply)?;

        let budget = budget.unwrap_or(self.config.default_iteration_budget);
        let headroom = self.supply_cap_headroom(underlying);
        let snapshot = self.snapshot(&[underlying], &[]);

        let state = self.market_state_mut(underlying)?;
        let (receipt, directives, notes) =
            Self::supply_core(state, on_behalf, amount, budget, headroom);

        if let Err(err) = self.apply_pool_directives(underlying, directives) {
            self.restore(snapshot);
            return Err(err);
        }
        self.notify_rewards(underlying, notes);

        tracing::info!(
            underlying,
            user = %on_behalf,
            amount = %amount,
            matched = %receipt.matched_p2p,
            to_pool = %receipt.forwarded_to_pool,
            idle = %receipt.routed_to_idle,
            "Supply executed"
        );
        Ok(receipt)
    }

    /// Borrow `amount` for `on_behalf`: consume idle supply, then the
    /// supply-side delta, promote waiting suppliers, and borrow the residual
    /// from the pool. Requires collateral headroom at the LTV bar.
    pub fn borrow(
        &mut self,
        underlying: &str,
        amount: Decimal,
        caller: UserId,
        on_behalf: UserId,
        budget: Option<u32>,
    ) -> Result<BorrowReceipt> {
        if amount.is_zero() {
            return Err(PeerlendError::AmountIsZero);
        }
        if !self.is_manager(on_behalf, caller) {
            return Err(PeerlendError::PermissionDenied {
                owner: on_behalf,
                caller,
            });
        }
        self.update_indexes(underlying)?;
        self.ensure_not_paused(underlying, "borrow", |pause| pause.borrow)?;
        if self.markets[underlying].market.pause.deprecated {
            return Err(PeerlendError::MarketDeprecated(underlying.to_string()));
        }

        let budget = budget.unwrap_or(self.config.default_iteration_budget);
        let snapshot = self.snapshot(&[underlying], &[on_behalf]);

        let state = self.market_state_mut(underlying)?;
        let (receipt, directives, notes) = Self::borrow_core(state, on_behalf, amount, budget);
        self.memberships
            .entry(on_behalf)
            .or_default()
            .borrowed
            .insert(underlying.to_string());

        // Solvency is checked against the post-borrow position, at the LTV
        // bar rather than the liquidation threshold.
        let liquidity = match self.liquidity_data(&on_behalf) {
            Ok(liquidity) => liquidity,
            Err(err) => {
                self.restore(snapshot);
                return Err(err);
            }
        };
        if liquidity.debt > liquidity.borrowable {
            let health_factor = liquidity.borrowable / liquidity.debt;
            self.restore(snapshot);
            return Err(PeerlendError::HealthFactorTooLow { health_factor });
        }

        if let Err(err) = self.apply_pool_directives(underlying, directives) {
            self.restore(snapshot);
            return Err(err);
        }
        self.notify_rewards(underlying, notes);

        tracing::info!(
            underlying,
            user = %on_behalf,
            amount = %amount,
            from_idle = %receipt.from_idle,
            matched = %receipt.matched_p2p,
            from_pool = %receipt.forwarded_to_pool,
            "Borrow executed"
        );
        Ok(receipt)
    }

    /// Repay up to `amount` of `on_behalf`'s debt: pool leg first, then the
    /// peer-to-peer leg through delta, fee, promotion, and the demote/
    /// supply-delta fallback, clamped through the supply cap.
    pub fn repay(
        &mut self,
        underlying: &str,
        amount: Decimal,
        on_behalf: UserId,
        budget: Option<u32>,
    ) -> Result<RepayReceipt> {
        if amount.is_zero() {
            return Err(PeerlendError::AmountIsZero);
        }
        self.update_indexes(underlying)?;
        self.ensure_not_paused(underlying, "repay", |pause| pause.repay)?;

        let borrow_balance = self.borrow_balance(underlying, &on_behalf);
        if borrow_balance.is_zero() {
            return Err(PeerlendError::UserNotInMarket {
                user: on_behalf,
                underlying: underlying.to_string(),
            });
        }
        let amount = amount.min(borrow_balance);

        let budget = budget.unwrap_or(self.config.default_iteration_budget);
        let headroom = self.supply_cap_headroom(underlying);
        let snapshot = self.snapshot(&[underlying], &[on_behalf]);

        let state = self.market_state_mut(underlying)?;
        let (receipt, directives, notes) =
            Self::repay_core(state, on_behalf, amount, budget, headroom);

        if self.borrow_balance(underlying, &on_behalf).is_zero() {
            if let Some(membership) = self.memberships.get_mut(&on_behalf) {
                membership.borrowed.remove(underlying);
            }
        }

        if let Err(err) = self.apply_pool_directives(underlying, directives) {
            self.restore(snapshot);
            return Err(err);
        }
        self.notify_rewards(underlying, notes);

        tracing::info!(
            underlying,
            user = %on_behalf,
            amount = %amount,
            on_pool = %receipt.repaid_on_pool,
            p2p = %receipt.repaid_p2p,
            fee = %receipt.fee_absorbed,
            "Repay executed"
        );
        Ok(receipt)
    }

    /// Withdraw up to `amount` of `on_behalf`'s supply: pool leg first, then
    /// the peer-to-peer leg through delta, promotion, and the demote/
    /// borrow-delta fallback.
    pub fn withdraw(
        &mut self,
        underlying: &str,
        amount: Decimal,
        caller: UserId,
        on_behalf: UserId,
        budget: Option<u32>,
    ) -> Result<WithdrawReceipt> {
        if amount.is_zero() {
            return Err(PeerlendError::AmountIsZero);
        }
        if !self.is_manager(on_behalf, caller) {
            return Err(PeerlendError::PermissionDenied {
                owner: on_behalf,
                caller,
            });
        }
        self.update_indexes(underlying)?;
        self.ensure_not_paused(underlying, "withdraw", |pause| pause.withdraw)?;

        let supply_balance = self.supply_balance(underlying, &on_behalf);
        if supply_balance.is_zero() {
            return Err(PeerlendError::UserNotInMarket {
                user: on_behalf,
                underlying: underlying.to_string(),
            });
        }
        let amount = amount.min(supply_balance);

        let budget = budget.unwrap_or(self.config.default_iteration_budget);
        let snapshot = self.snapshot(&[underlying], &[]);

        let state = self.market_state_mut(underlying)?;
        let (receipt, directives, notes) = Self::withdraw_core(state, on_behalf, amount, budget);

        if let Err(err) = self.apply_pool_directives(underlying, directives) {
            self.restore(snapshot);
            return Err(err);
        }
        self.notify_rewards(underlying, notes);

        tracing::info!(
            underlying,
            user = %on_behalf,
            amount = %amount,
            on_pool = %receipt.withdrawn_on_pool,
            p2p = %receipt.withdrawn_p2p,
            "Withdraw executed"
        );
        Ok(receipt)
    }

    /// Supply collateral for `on_behalf`. Collateral never matches
    /// peer-to-peer; it rests in the pool at the pool supply rate.
    pub fn supply_collateral(
        &mut self,
        underlying: &str,
        amount: Decimal,
        on_behalf: UserId,
    ) -> Result<()> {
        if amount.is_zero() {
            return Err(PeerlendError::AmountIsZero);
        }
        self.update_indexes(underlying)?;
        self.ensure_not_paused(underlying, "supply_collateral", |pause| {
            pause.supply_collateral
        })?;

        let snapshot = self.snapshot(&[underlying], &[on_behalf]);

        let state = self.market_state_mut(underlying)?;
        let pool_index = state.market.indexes.supply.pool_index;
        let previous = state.balances.scaled_collateral(&on_behalf);
        state
            .balances
            .increase_collateral(on_behalf, amount / pool_index);
        self.memberships
            .entry(on_behalf)
            .or_default()
            .collateral
            .insert(underlying.to_string());

        if let Err(err) = self.pool.supply(underlying, amount) {
            self.restore(snapshot);
            return Err(err);
        }
        self.notify_rewards(underlying, vec![(on_behalf, previous)]);

        tracing::info!(underlying, user = %on_behalf, amount = %amount, "Collateral supplied");
        Ok(())
    }

    /// Withdraw up to `amount` of `on_behalf`'s collateral, guarded by the
    /// liquidation-threshold health check on the remaining position.
    pub fn withdraw_collateral(
        &mut self,
        underlying: &str,
        amount: Decimal,
        caller: UserId,
        on_behalf: UserId,
    ) -> Result<Decimal> {
        if amount.is_zero() {
            return Err(PeerlendError::AmountIsZero);
        }
        if !self.is_manager(on_behalf, caller) {
            return Err(PeerlendError::PermissionDenied {
                owner: on_behalf,
                caller,
            });
        }
        self.update_indexes(underlying)?;
        self.ensure_not_paused(underlying, "withdraw_collateral", |pause| {
            pause.withdraw_collateral
        })?;

        let balance = self.collateral_balance(underlying, &on_behalf);
        if balance.is_zero() {
            return Err(PeerlendError::UserNotInMarket {
                user: on_behalf,
                underlying: underlying.to_string(),
            });
        }
        let amount = amount.min(balance);

        let snapshot = self.snapshot(&[underlying], &[on_behalf]);

        let state = self.market_state_mut(underlying)?;
        let pool_index = state.market.indexes.supply.pool_index;
        let previous = state.balances.scaled_collateral(&on_behalf);
        let scaled = if amount == balance {
            previous
        } else {
            amount / pool_index
        };
        let cleared = {
            state.balances.decrease_collateral(on_behalf, scaled);
            state.balances.scaled_collateral(&on_behalf).is_zero()
        };
        if cleared {
            if let Some(membership) = self.memberships.get_mut(&on_behalf) {
                membership.collateral.remove(underlying);
            }
        }

        let liquidity = match self.liquidity_data(&on_behalf) {
            Ok(liquidity) => liquidity,
            Err(err) => {
                self.restore(snapshot);
                return Err(err);
            }
        };
        if !liquidity.is_healthy() {
            let health_factor = liquidity.health_factor();
            self.restore(snapshot);
            return Err(PeerlendError::HealthFactorTooLow { health_factor });
        }

        if let Err(err) = self.pool.withdraw(underlying, amount) {
            self.restore(snapshot);
            return Err(err);
        }
        self.notify_rewards(underlying, vec![(on_behalf, previous)]);

        tracing::info!(underlying, user = %on_behalf, amount = %amount, "Collateral withdrawn");
        Ok(amount)
    }

    /// Liquidate an unhealthy borrower: repay part of their debt and seize
    /// collateral at the liquidation bonus. Both legs run with a zero
    /// iteration budget, routing unmatched residue to the delta fallback.
    pub fn liquidate(
        &mut self,
        borrowed: &str,
        collateral: &str,
        borrower: UserId,
        amount: Decimal,
    ) -> Result<LiquidateReceipt> {
        if amount.is_zero() {
            return Err(PeerlendError::AmountIsZero);
        }
        self.update_indexes(borrowed)?;
        self.update_indexes(collateral)?;
        self.ensure_not_paused(borrowed, "liquidate", |pause| pause.liquidate)?;
        self.ensure_not_paused(collateral, "liquidate", |pause| pause.liquidate)?;

        let membership = self.memberships.get(&borrower).cloned().unwrap_or_default();
        if !membership.borrowed.contains(borrowed) {
            return Err(PeerlendError::UserNotInMarket {
                user: borrower,
                underlying: borrowed.to_string(),
            });
        }
        if !membership.collateral.contains(collateral) {
            return Err(PeerlendError::UserNotInMarket {
                user: borrower,
                underlying: collateral.to_string(),
            });
        }

        let liquidity = self.liquidity_data(&borrower)?;
        let health_factor = liquidity.health_factor();
        let deprecated = self.markets[borrowed].market.pause.deprecated;
        if !deprecated && liquidity.is_healthy() {
            return Err(PeerlendError::LiquidationNotAllowed { health_factor });
        }
        let close_factor_bps =
            if deprecated || health_factor < bps(FULL_CLOSE_HEALTH_FACTOR_BPS) {
                MAX_CLOSE_FACTOR_BPS
            } else {
                DEFAULT_CLOSE_FACTOR_BPS
            };

        let borrow_balance = self.borrow_balance(borrowed, &borrower);
        let mut to_repay = amount.min(percent_of(borrow_balance, close_factor_bps));

        let borrowed_price = self.oracle.price(borrowed)?;
        let collateral_price = self.oracle.price(collateral)?;
        let borrowed_reserve = self.pool.reserve(borrowed);
        let collateral_reserve = self.pool.reserve(collateral);
        let bonus = Decimal::ONE + bps(collateral_reserve.liquidation_bonus_bps);

        let collateral_balance = self.collateral_balance(collateral, &borrower);
        let mut seized = (to_repay * borrowed_price * bonus / collateral_price)
            .round_dp(collateral_reserve.decimals);
        if seized > collateral_balance {
            seized = collateral_balance;
            to_repay = (seized * collateral_price / (bonus * borrowed_price))
                .round_dp(borrowed_reserve.decimals);
        }

        let headroom = self.supply_cap_headroom(borrowed);
        let snapshot = self.snapshot(&[borrowed, collateral], &[borrower]);

        // Debt leg: the repay sequence with a zero budget.
        let state = self.market_state_mut(borrowed)?;
        let (repay_receipt, directives, notes) =
            Self::repay_core(state, borrower, to_repay, 0, headroom);
        if self.borrow_balance(borrowed, &borrower).is_zero() {
            if let Some(membership) = self.memberships.get_mut(&borrower) {
                membership.borrowed.remove(borrowed);
            }
        }

        // Collateral leg: a raw seize off the collateral bucket.
        let collateral_state = self.market_state_mut(collateral)?;
        let previous = collateral_state.balances.scaled_collateral(&borrower);
        let pool_index = collateral_state.market.indexes.supply.pool_index;
        let scaled_seized = if seized == collateral_balance {
            previous
        } else {
            seized / pool_index
        };
        collateral_state
            .balances
            .decrease_collateral(borrower, scaled_seized);
        let collateral_cleared = collateral_state
            .balances
            .scaled_collateral(&borrower)
            .is_zero();
        if collateral_cleared {
            if let Some(membership) = self.memberships.get_mut(&borrower) {
                membership.collateral.remove(collateral);
            }
        }

        if let Err(err) = self
            .apply_pool_directives(borrowed, directives)
            .and_then(|()| self.pool.withdraw(collateral, seized))
        {
            self.restore(snapshot);
            return Err(err);
        }
        self.notify_rewards(borrowed, notes);
        self.notify_rewards(collateral, vec![(borrower, previous)]);

        tracing::info!(
            borrowed,
            collateral,
            borrower = %borrower,
            repaid = %to_repay,
            seized = %seized,
            "Liquidation executed"
        );
        Ok(LiquidateReceipt {
            repaid: to_repay,
            seized,
            repay: repay_receipt,
        })
    }

    // =================================================================
    // Views
    // =================================================================

    /// The market record, if created.
    #[must_use]
    pub fn market(&self, underlying: &str) -> Option<&Market> {
        self.markets.get(underlying).map(|state| &state.market)
    }

    /// The user's total supply balance value (pool + peer-to-peer).
    #[must_use]
    pub fn supply_balance(&self, underlying: &str, user: &UserId) -> Decimal {
        self.markets.get(underlying).map_or(Decimal::ZERO, |state| {
            state
                .balances
                .supply_balance(user, &state.market.indexes.supply)
        })
    }

    /// The user's total borrow balance value (pool + peer-to-peer).
    #[must_use]
    pub fn borrow_balance(&self, underlying: &str, user: &UserId) -> Decimal {
        self.markets.get(underlying).map_or(Decimal::ZERO, |state| {
            state
                .balances
                .borrow_balance(user, &state.market.indexes.borrow)
        })
    }

    /// The user's collateral balance value.
    #[must_use]
    pub fn collateral_balance(&self, underlying: &str, user: &UserId) -> Decimal {
        self.markets.get(underlying).map_or(Decimal::ZERO, |state| {
            state
                .balances
                .collateral_balance(user, state.market.indexes.supply.pool_index)
        })
    }

    /// The user's scaled balance in the pool-supply bucket.
    #[must_use]
    pub fn scaled_pool_supply(&self, underlying: &str, user: &UserId) -> Decimal {
        self.markets.get(underlying).map_or(Decimal::ZERO, |state| {
            state.balances.scaled_pool_supply(user)
        })
    }

    /// The user's scaled balance in the peer-to-peer supply bucket.
    #[must_use]
    pub fn scaled_p2p_supply(&self, underlying: &str, user: &UserId) -> Decimal {
        self.markets.get(underlying).map_or(Decimal::ZERO, |state| {
            state.balances.scaled_p2p_supply(user)
        })
    }

    /// The user's scaled balance in the pool-borrow bucket.
    #[must_use]
    pub fn scaled_pool_borrow(&self, underlying: &str, user: &UserId) -> Decimal {
        self.markets.get(underlying).map_or(Decimal::ZERO, |state| {
            state.balances.scaled_pool_borrow(user)
        })
    }

    /// The user's scaled balance in the peer-to-peer borrow bucket.
    #[must_use]
    pub fn scaled_p2p_borrow(&self, underlying: &str, user: &UserId) -> Decimal {
        self.markets.get(underlying).map_or(Decimal::ZERO, |state| {
            state.balances.scaled_p2p_borrow(user)
        })
    }

    /// The user's raw scaled collateral balance.
    #[must_use]
    pub fn scaled_collateral(&self, underlying: &str, user: &UserId) -> Decimal {
        self.markets.get(underlying).map_or(Decimal::ZERO, |state| {
            state.balances.scaled_collateral(user)
        })
    }

    /// Aggregate position values over the user's membership markets.
    pub fn liquidity_data(&self, user: &UserId) -> Result<LiquidityData> {
        let empty = Membership::default();
        let membership = self.memberships.get(user).unwrap_or(&empty);
        health::compute_liquidity_data(&self.markets, membership, user, &self.pool, &self.oracle)
    }

    /// The user's health factor; `Decimal::MAX` without debt.
    pub fn health_factor(&self, user: &UserId) -> Result<Decimal> {
        Ok(self.liquidity_data(user)?.health_factor())
    }

    /// Collaborator access, mainly for tests and integrations.
    #[must_use]
    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut P {
        &mut self.pool
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    #[must_use]
    pub fn rewards(&self) -> &R {
        &self.rewards
    }

    // =================================================================
    // Operation cores (pure internal accounting, no collaborator calls)
    // =================================================================

    fn supply_core(
        state: &mut MarketState,
        on_behalf: UserId,
        amount: Decimal,
        budget: u32,
        headroom: Option<Decimal>,
    ) -> (SupplyReceipt, PoolDirectives, Vec<RewardNote>) {
        let mut remaining = amount;
        let mut directives = PoolDirectives::default();
        let mut notes: Vec<RewardNote> = Vec::new();
        let mut matched_delta = Decimal::ZERO;
        let mut promoted = Decimal::ZERO;

        if !state.market.pause.p2p_disabled {
            let (delta, rest) = accounting::match_delta(&mut state.market, Side::Borrow, remaining);
            matched_delta = delta;
            remaining = rest;

            let borrow_indexes = state.market.indexes.borrow;
            let result =
                matching::promote_borrowers(&mut state.balances, &borrow_indexes, remaining, budget);
            promoted = result.matched;
            remaining -= promoted;
            notes.extend(
                result
                    .touched
                    .iter()
                    .map(|change| (change.user, change.previous_scaled_pool)),
            );
        }

        let matched_total = matched_delta + promoted;
        if matched_total > Decimal::ZERO {
            let scaled = accounting::increase_p2p_totals(
                &mut state.market,
                Side::Supply,
                promoted,
                matched_total,
            );
            let previous = state.balances.scaled_p2p_supply(&on_behalf);
            state.balances.set_p2p_supply(on_behalf, previous + scaled);
            directives.repay = matched_total;
        }

        let mut routed_to_idle = Decimal::ZERO;
        if remaining > Decimal::ZERO {
            let suppliable = accounting::handle_supply_cap(&mut state.market, remaining, headroom);
            let excess = remaining - suppliable;
            if excess > Decimal::ZERO {
                // Capped volume parks as idle and is credited as matched
                // peer-to-peer, keeping idle inside the p2p supply total.
                let scaled = accounting::increase_p2p_totals(
                    &mut state.market,
                    Side::Supply,
                    Decimal::ZERO,
                    excess,
                );
                let previous = state.balances.scaled_p2p_supply(&on_behalf);
                state.balances.set_p2p_supply(on_behalf, previous + scaled);
                routed_to_idle = excess;
            }
            if suppliable > Decimal::ZERO {
                let pool_index = state.market.indexes.supply.pool_index;
                let previous = state.balances.scaled_pool_supply(&on_behalf);
                notes.push((on_behalf, previous));
                state
                    .balances
                    .set_pool_supply(on_behalf, previous + suppliable / pool_index);
                directives.supply = suppliable;
            }
        }

        let receipt = SupplyReceipt {
            matched_p2p: matched_total,
            forwarded_to_pool: directives.supply,
            routed_to_idle,
        };
        (receipt, directives, notes)
    }

    fn borrow_core(
        state: &mut MarketState,
        on_behalf: UserId,
        amount: Decimal,
        budget: u32,
    ) -> (BorrowReceipt, PoolDirectives, Vec<RewardNote>) {
        let mut remaining = amount;
        let mut directives = PoolDirectives::default();
        let mut notes: Vec<RewardNote> = Vec::new();
        let mut from_idle = Decimal::ZERO;
        let mut matched_delta = Decimal::ZERO;
        let mut promoted = Decimal::ZERO;

        if !state.market.pause.p2p_disabled {
            let (idle, rest) = accounting::consume_idle(&mut state.market, remaining);
            from_idle = idle;
            remaining = rest;

            let (delta, rest) = accounting::match_delta(&mut state.market, Side::Supply, remaining);
            matched_delta = delta;
            remaining = rest;

            let supply_indexes = state.market.indexes.supply;
            let result =
                matching::promote_suppliers(&mut state.balances, &supply_indexes, remaining, budget);
            promoted = result.matched;
            remaining -= promoted;
            notes.extend(
                result
                    .touched
                    .iter()
                    .map(|change| (change.user, change.previous_scaled_pool)),
            );
        }

        let matched_total = from_idle + matched_delta + promoted;
        if matched_total > Decimal::ZERO {
            let scaled = accounting::increase_p2p_totals(
                &mut state.market,
                Side::Borrow,
                promoted,
                matched_total,
            );
            let previous = state.balances.scaled_p2p_borrow(&on_behalf);
            state.balances.set_p2p_borrow(on_behalf, previous + scaled);
            // Idle never touched the pool; only delta and promotions did.
            directives.withdraw = matched_delta + promoted;
        }

        if remaining > Decimal::ZERO {
            let pool_index = state.market.indexes.borrow.pool_index;
            let previous = state.balances.scaled_pool_borrow(&on_behalf);
            notes.push((on_behalf, previous));
            state
                .balances
                .set_pool_borrow(on_behalf, previous + remaining / pool_index);
            directives.borrow = remaining;
        }

        let receipt = BorrowReceipt {
            from_idle,
            matched_p2p: matched_delta + promoted,
            forwarded_to_pool: remaining,
        };
        (receipt, directives, notes)
    }

    fn repay_core(
        state: &mut MarketState,
        on_behalf: UserId,
        amount: Decimal,
        budget: u32,
        headroom: Option<Decimal>,
    ) -> (RepayReceipt, PoolDirectives, Vec<RewardNote>) {
        let mut remaining = amount;
        let mut directives = PoolDirectives::default();
        let mut notes: Vec<RewardNote> = Vec::new();

        // Pool leg first.
        let borrow_indexes = state.market.indexes.borrow;
        let scaled_pool = state.balances.scaled_pool_borrow(&on_behalf);
        let pool_value = scaled_pool * borrow_indexes.pool_index;
        let on_pool_leg = pool_value.min(remaining);
        if on_pool_leg > Decimal::ZERO {
            notes.push((on_behalf, scaled_pool));
            let new_scaled = if on_pool_leg == pool_value {
                Decimal::ZERO
            } else {
                scaled_pool - on_pool_leg / borrow_indexes.pool_index
            };
            state.balances.set_pool_borrow(on_behalf, new_scaled);
            remaining -= on_pool_leg;
        }

        let p2p_portion = remaining;
        let mut fee = Decimal::ZERO;
        let mut to_supply = Decimal::ZERO;
        let mut routed_to_idle = Decimal::ZERO;

        if remaining > Decimal::ZERO {
            // Close the peer-to-peer borrow bucket.
            let scaled_p2p = state.balances.scaled_p2p_borrow(&on_behalf);
            let p2p_value = scaled_p2p * borrow_indexes.p2p_index;
            let new_scaled = if remaining >= p2p_value {
                Decimal::ZERO
            } else {
                scaled_p2p - remaining / borrow_indexes.p2p_index
            };
            state.balances.set_p2p_borrow(on_behalf, new_scaled);

            let (delta, rest) = accounting::match_delta(&mut state.market, Side::Borrow, remaining);
            remaining = rest;

            let (absorbed, rest) = accounting::repay_fee(&mut state.market, remaining);
            fee = absorbed;
            remaining = rest;

            let promote_budget = if state.market.pause.p2p_disabled {
                0
            } else {
                budget
            };
            let result = matching::promote_borrowers(
                &mut state.balances,
                &borrow_indexes,
                remaining,
                promote_budget,
            );
            let promoted = result.matched;
            remaining -= promoted;
            notes.extend(
                result
                    .touched
                    .iter()
                    .map(|change| (change.user, change.previous_scaled_pool)),
            );

            directives.repay = on_pool_leg + delta + promoted;

            // Freed liquidity returns to suppliers: cap-clamped pool supply
            // via demotion, with the supply delta as the budget fallback.
            let remainder = remaining;
            let mut demoted = Decimal::ZERO;
            if remainder > Decimal::ZERO {
                let suppliable =
                    accounting::handle_supply_cap(&mut state.market, remainder, headroom);
                routed_to_idle = remainder - suppliable;
                if suppliable > Decimal::ZERO {
                    let demote_budget = budget.saturating_sub(result.iterations_used);
                    let supply_indexes = state.market.indexes.supply;
                    let demote_result = matching::demote_suppliers(
                        &mut state.balances,
                        &supply_indexes,
                        suppliable,
                        demote_budget,
                    );
                    demoted = demote_result.matched;
                    notes.extend(
                        demote_result
                            .touched
                            .iter()
                            .map(|change| (change.user, change.previous_scaled_pool)),
                    );
                    if demoted < suppliable {
                        accounting::increase_delta(
                            &mut state.market,
                            Side::Supply,
                            suppliable - demoted,
                        );
                    }
                    directives.supply = suppliable;
                    to_supply = suppliable;
                }
            }
            accounting::decrease_p2p_totals(
                &mut state.market,
                Side::Borrow,
                demoted,
                delta + remainder,
            );
        } else {
            directives.repay = on_pool_leg;
        }

        let receipt = RepayReceipt {
            repaid_on_pool: on_pool_leg,
            repaid_p2p: p2p_portion,
            fee_absorbed: fee,
            resupplied_to_pool: to_supply,
            routed_to_idle,
        };
        (receipt, directives, notes)
    }

    fn withdraw_core(
        state: &mut MarketState,
        on_behalf: UserId,
        amount: Decimal,
        budget: u32,
    ) -> (WithdrawReceipt, PoolDirectives, Vec<RewardNote>) {
        let mut remaining = amount;
        let mut directives = PoolDirectives::default();
        let mut notes: Vec<RewardNote> = Vec::new();

        // Pool leg first.
        let supply_indexes = state.market.indexes.supply;
        let scaled_pool = state.balances.scaled_pool_supply(&on_behalf);
        let pool_value = scaled_pool * supply_indexes.pool_index;
        let on_pool_leg = pool_value.min(remaining);
        if on_pool_leg > Decimal::ZERO {
            notes.push((on_behalf, scaled_pool));
            let new_scaled = if on_pool_leg == pool_value {
                Decimal::ZERO
            } else {
                scaled_pool - on_pool_leg / supply_indexes.pool_index
            };
            state.balances.set_pool_supply(on_behalf, new_scaled);
            remaining -= on_pool_leg;
        }

        let p2p_portion = remaining;
        let mut delta = Decimal::ZERO;
        let mut promoted = Decimal::ZERO;
        let mut remainder = Decimal::ZERO;

        if remaining > Decimal::ZERO {
            // Close the peer-to-peer supply bucket.
            let scaled_p2p = state.balances.scaled_p2p_supply(&on_behalf);
            let p2p_value = scaled_p2p * supply_indexes.p2p_index;
            let new_scaled = if remaining >= p2p_value {
                Decimal::ZERO
            } else {
                scaled_p2p - remaining / supply_indexes.p2p_index
            };
            state.balances.set_p2p_supply(on_behalf, new_scaled);

            let (matched, rest) =
                accounting::match_delta(&mut state.market, Side::Supply, remaining);
            delta = matched;
            remaining = rest;

            let promote_budget = if state.market.pause.p2p_disabled {
                0
            } else {
                budget
            };
            let result = matching::promote_suppliers(
                &mut state.balances,
                &supply_indexes,
                remaining,
                promote_budget,
            );
            promoted = result.matched;
            remaining -= promoted;
            notes.extend(
                result
                    .touched
                    .iter()
                    .map(|change| (change.user, change.previous_scaled_pool)),
            );

            // The rest is pulled from borrowers: demote them to the pool,
            // with the borrow delta as the budget fallback.
            remainder = remaining;
            let mut demoted = Decimal::ZERO;
            if remainder > Decimal::ZERO {
                let demote_budget = budget.saturating_sub(result.iterations_used);
                let borrow_indexes = state.market.indexes.borrow;
                let demote_result = matching::demote_borrowers(
                    &mut state.balances,
                    &borrow_indexes,
                    remainder,
                    demote_budget,
                );
                demoted = demote_result.matched;
                notes.extend(
                    demote_result
                        .touched
                        .iter()
                        .map(|change| (change.user, change.previous_scaled_pool)),
                );
                if demoted < remainder {
                    accounting::increase_delta(
                        &mut state.market,
                        Side::Borrow,
                        remainder - demoted,
                    );
                }
                directives.borrow = remainder;
            }
            accounting::decrease_p2p_totals(
                &mut state.market,
                Side::Supply,
                demoted,
                delta + remainder,
            );
        }

        directives.withdraw = on_pool_leg + delta + promoted;

        let receipt = WithdrawReceipt {
            withdrawn_on_pool: on_pool_leg,
            withdrawn_p2p: p2p_portion,
            reborrowed_from_pool: remainder,
        };
        (receipt, directives, notes)
    }

    // =================================================================
    // Internal helpers
    // =================================================================

    fn market_state_mut(&mut self, underlying: &str) -> Result<&mut MarketState> {
        self.markets
            .get_mut(underlying)
            .ok_or_else(|| PeerlendError::MarketNotCreated(underlying.to_string()))
    }

    fn ensure_not_paused(
        &self,
        underlying: &str,
        operation: &'static str,
        is_paused: impl Fn(&PauseStatuses) -> bool,
    ) -> Result<()> {
        let state = self
            .markets
            .get(underlying)
            .ok_or_else(|| PeerlendError::MarketNotCreated(underlying.to_string()))?;
        if is_paused(&state.market.pause) {
            return Err(PeerlendError::OperationPaused {
                underlying: underlying.to_string(),
                operation,
            });
        }
        Ok(())
    }

    fn supply_cap_headroom(&self, underlying: &str) -> Option<Decimal> {
        self.pool
            .reserve(underlying)
            .supply_cap
            .map(|cap| zero_floor_sub(cap, self.pool.total_supplied(underlying)))
    }

    fn snapshot(&self, assets: &[&str], users: &[UserId]) -> Snapshot {
        Snapshot {
            markets: assets
                .iter()
                .filter_map(|asset| {
                    self.markets
                        .get(*asset)
                        .map(|state| ((*asset).to_string(), state.clone()))
                })
                .collect(),
            memberships: users
                .iter()
                .map(|user| (*user, self.memberships.get(user).cloned()))
                .collect(),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        for (asset, state) in snapshot.markets {
            self.markets.insert(asset, state);
        }
        for (user, membership) in snapshot.memberships {
            match membership {
                Some(membership) => {
                    self.memberships.insert(user, membership);
                }
                None => {
                    self.memberships.remove(&user);
                }
            }
        }
    }

    fn apply_pool_directives(
        &mut self,
        underlying: &str,
        directives: PoolDirectives,
    ) -> Result<()> {
        if directives.repay > Decimal::ZERO {
            self.pool.repay(underlying, directives.repay)?;
        }
        if directives.supply > Decimal::ZERO {
            self.pool.supply(underlying, directives.supply)?;
        }
        if directives.withdraw > Decimal::ZERO {
            self.pool.withdraw(underlying, directives.withdraw)?;
        }
        if directives.borrow > Decimal::ZERO {
            self.pool.borrow(underlying, directives.borrow)?;
        }
        Ok(())
    }

    fn notify_rewards(&mut self, underlying: &str, notes: Vec<RewardNote>) {
        for (user, previous) in notes {
            self.rewards
                .on_pool_balance_change(user, underlying, previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use peerlend_types::EngineConfig;

    use super::*;
    use crate::testing::{MockOracle, MockPool, RecordingRewards};

    type TestEngine = PeerLendEngine<MockPool, MockOracle, RecordingRewards>;

    fn engine() -> TestEngine {
        PeerLendEngine::new(
            EngineConfig::default(),
            MockPool::new(),
            MockOracle::new(),
            RecordingRewards::new(),
        )
    }

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    #[test]
    fn create_market_rejects_duplicates() {
        let mut engine = engine();
        engine.create_market("USDC", MarketParams::default()).unwrap();
        assert!(matches!(
            engine.create_market("USDC", MarketParams::default()),
            Err(PeerlendError::MarketAlreadyCreated(_))
        ));
    }

    #[test]
    fn operations_reject_zero_amounts() {
        let mut engine = engine();
        engine.create_market("USDC", MarketParams::default()).unwrap();
        let user = UserId::new();
        assert!(matches!(
            engine.supply("USDC", Decimal::ZERO, user, None),
            Err(PeerlendError::AmountIsZero)
        ));
        assert!(matches!(
            engine.repay("USDC", Decimal::ZERO, user, None),
            Err(PeerlendError::AmountIsZero)
        ));
    }

    #[test]
    fn operations_reject_unknown_markets() {
        let mut engine = engine();
        let user = UserId::new();
        assert!(matches!(
            engine.supply("DAI", dec(100), user, None),
            Err(PeerlendError::MarketNotCreated(_))
        ));
    }

    #[test]
    fn paused_supply_rejected_without_mutation() {
        let mut engine = engine();
        engine.create_market("USDC", MarketParams::default()).unwrap();
        engine
            .set_pause_statuses(
                "USDC",
                PauseStatuses {
                    supply: true,
                    ..PauseStatuses::default()
                },
            )
            .unwrap();
        let user = UserId::new();
        assert!(matches!(
            engine.supply("USDC", dec(100), user, None),
            Err(PeerlendError::OperationPaused { .. })
        ));
        assert_eq!(engine.supply_balance("USDC", &user), Decimal::ZERO);
        assert!(engine.pool().calls().is_empty());
    }

    #[test]
    fn manager_approval_gates_on_behalf_withdraw() {
        let mut engine = engine();
        engine.create_market("USDC", MarketParams::default()).unwrap();
        let owner = UserId::new();
        let manager = UserId::new();
        engine.supply("USDC", dec(100), owner, None).unwrap();

        assert!(matches!(
            engine.withdraw("USDC", dec(50), manager, owner, None),
            Err(PeerlendError::PermissionDenied { .. })
        ));

        engine.approve_manager(owner, manager, true);
        assert!(engine.withdraw("USDC", dec(50), manager, owner, None).is_ok());

        engine.approve_manager(owner, manager, false);
        assert!(matches!(
            engine.withdraw("USDC", dec(50), manager, owner, None),
            Err(PeerlendError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn borrow_on_deprecated_market_rejected() {
        let mut engine = engine();
        engine.create_market("USDC", MarketParams::default()).unwrap();
        engine
            .set_pause_statuses(
                "USDC",
                PauseStatuses {
                    deprecated: true,
                    ..PauseStatuses::default()
                },
            )
            .unwrap();
        let user = UserId::new();
        assert!(matches!(
            engine.borrow("USDC", dec(100), user, user, None),
            Err(PeerlendError::MarketDeprecated(_))
        ));
    }
}

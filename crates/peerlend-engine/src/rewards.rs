//! The reward tracker collaborator.
//!
//! Notified whenever a pool-side balance changes, with the balance *before*
//! the change. Fire-and-forget: notifications happen only after an operation
//! commits, and the tracker takes no part in the engine's invariants.

use peerlend_types::UserId;
use rust_decimal::Decimal;

/// External reward-distribution bookkeeping.
pub trait RewardTracker {
    fn on_pool_balance_change(
        &mut self,
        user: UserId,
        asset: &str,
        previous_pool_balance: Decimal,
    );
}

/// A tracker that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRewards;

impl RewardTracker for NoopRewards {
    fn on_pool_balance_change(&mut self, _: UserId, _: &str, _: Decimal) {}
}

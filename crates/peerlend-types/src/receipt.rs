//! Operation receipts: the pool-facing splits of each completed operation.
//!
//! Every orchestrated operation reports where each unit of the requested
//! amount ended up — matched peer-to-peer, forwarded to the pool, or parked
//! as idle supply. Receipts are pure outcome records; the engine has already
//! applied the corresponding pool calls when one is returned.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of a supply operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyReceipt {
    /// Volume matched peer-to-peer (borrow delta consumed + borrowers
    /// promoted); repaid to the pool on the borrowers' behalf.
    pub matched_p2p: Decimal,
    /// Residual volume supplied to the pool.
    pub forwarded_to_pool: Decimal,
    /// Volume diverted to idle supply by the external supply cap.
    pub routed_to_idle: Decimal,
}

impl SupplyReceipt {
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.matched_p2p + self.forwarded_to_pool + self.routed_to_idle
    }
}

/// Outcome of a borrow operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowReceipt {
    /// Volume served from idle supply (consumed before any matching).
    pub from_idle: Decimal,
    /// Volume matched peer-to-peer (supply delta consumed + suppliers
    /// promoted); withdrawn from the pool.
    pub matched_p2p: Decimal,
    /// Residual volume borrowed from the pool.
    pub forwarded_to_pool: Decimal,
}

impl BorrowReceipt {
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.from_idle + self.matched_p2p + self.forwarded_to_pool
    }
}

/// Outcome of a repay operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepayReceipt {
    /// Volume that paid down the user's pool-side borrow.
    pub repaid_on_pool: Decimal,
    /// Volume that paid down the user's peer-to-peer borrow.
    pub repaid_p2p: Decimal,
    /// Portion of the peer-to-peer leg absorbed as protocol fee.
    pub fee_absorbed: Decimal,
    /// Freed liquidity re-supplied to the pool (demoted suppliers or
    /// supply-delta fallback).
    pub resupplied_to_pool: Decimal,
    /// Freed liquidity parked as idle supply by the external supply cap.
    pub routed_to_idle: Decimal,
}

impl RepayReceipt {
    /// Total amount the repayer actually paid.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.repaid_on_pool + self.repaid_p2p
    }
}

/// Outcome of a withdraw operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    /// Volume withdrawn from the user's pool-side supply.
    pub withdrawn_on_pool: Decimal,
    /// Volume withdrawn from the user's peer-to-peer supply.
    pub withdrawn_p2p: Decimal,
    /// Portion of the peer-to-peer leg the protocol borrowed back from the
    /// pool (demoted borrowers or borrow-delta fallback).
    pub reborrowed_from_pool: Decimal,
}

impl WithdrawReceipt {
    /// Total amount handed to the withdrawer.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.withdrawn_on_pool + self.withdrawn_p2p
    }
}

/// Outcome of a liquidation: a repay leg on the debt market and a seizure on
/// the collateral market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidateReceipt {
    /// Debt repaid by the liquidator.
    pub repaid: Decimal,
    /// Collateral seized by the liquidator (includes the liquidation bonus).
    pub seized: Decimal,
    /// The internal repay leg's receipt.
    pub repay: RepayReceipt,
}

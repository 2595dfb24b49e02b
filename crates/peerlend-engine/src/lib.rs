//! # peerlend-engine
//!
//! **The PeerLend position orchestrator.**
//!
//! This crate drives each operation end to end: index refresh, validation,
//! delta consumption, bounded promotion/demotion, idle adjustment, and the
//! final pool-facing splits. It owns the collaborator seams:
//!
//! - [`LendingPool`] — the underlying pooled market (consumed, never
//!   implemented)
//! - [`PriceOracle`] — per-asset prices for health factors and liquidation
//! - [`RewardTracker`] — fire-and-forget pool-balance change notifications
//!
//! Operations are serialized, all-or-nothing units of work: any error rolls
//! the touched market state back to its pre-operation snapshot.

pub mod health;
pub mod oracle;
pub mod orchestrator;
pub mod pool;
pub mod positions;
pub mod rewards;
pub mod testing;

pub use health::LiquidityData;
pub use oracle::PriceOracle;
pub use orchestrator::PeerLendEngine;
pub use pool::{LendingPool, ReserveData};
pub use positions::{MarketState, Membership};
pub use rewards::{NoopRewards, RewardTracker};

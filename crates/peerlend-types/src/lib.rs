//! # peerlend-types
//!
//! Shared types, errors, and configuration for the **PeerLend** peer-to-peer
//! lending overlay.
//!
//! This crate is the leaf dependency of the workspace — every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`UserId`], [`Asset`]
//! - **Market model**: [`Market`], [`Indexes`], [`PoolIndexes`], [`Deltas`],
//!   [`MarketSideDelta`], [`PauseStatuses`], [`Side`]
//! - **Receipts**: [`SupplyReceipt`], [`BorrowReceipt`], [`RepayReceipt`],
//!   [`WithdrawReceipt`], [`LiquidateReceipt`]
//! - **Configuration**: [`MarketParams`], [`EngineConfig`]
//! - **Errors**: [`PeerlendError`] with `PL_ERR_` prefix codes
//! - **Fixed-point helpers**: [`math`] (zero-floor subtraction, bps scaling)
//! - **Constants**: system-wide limits and defaults

pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod market;
pub mod math;
pub mod receipt;

// Re-export all primary types at crate root for ergonomic imports:
//   use peerlend_types::{Market, Side, Deltas, PeerlendError, ...};

pub use config::*;
pub use error::*;
pub use ids::*;
pub use market::*;
pub use receipt::*;

// Constants are accessed via `peerlend_types::constants::FOO`
// (not re-exported to avoid name collisions).

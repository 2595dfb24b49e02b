//! System-wide constants for the PeerLend engine.

/// Basis-point scale: 10_000 bps = 100%.
pub const BPS_FACTOR: u32 = 10_000;

/// Default iteration budget for a single matching call when the caller does
/// not supply one. Bounds the number of distinct users a promote/demote
/// walk may touch.
pub const DEFAULT_ITERATION_BUDGET: u32 = 10;

/// Default liquidation close factor: at most half the borrow position may be
/// repaid by a liquidator in one call.
pub const DEFAULT_CLOSE_FACTOR_BPS: u16 = 5_000;

/// Close factor once a position is deeply unhealthy (or its borrow market is
/// deprecated): the full borrow position may be repaid.
pub const MAX_CLOSE_FACTOR_BPS: u16 = 10_000;

/// Health factor below which liquidation is permitted (1.0 in bps).
pub const LIQUIDATION_HEALTH_FACTOR_BPS: u16 = 10_000;

/// Health factor below which the full close factor applies (0.95 in bps).
pub const FULL_CLOSE_HEALTH_FACTOR_BPS: u16 = 9_500;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "PeerLend";

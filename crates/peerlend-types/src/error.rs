//! Error types for the PeerLend engine.
//!
//! All errors use the `PL_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Input errors
//! - 2xx: Policy errors
//! - 3xx: Authorization errors
//! - 4xx: Solvency errors
//! - 5xx: Arithmetic errors
//! - 6xx: Collaborator errors (pool, oracle)
//! - 9xx: General / internal errors
//!
//! Every error is detected synchronously, before or instead of state
//! mutation — a returned error means the operation left no partial state.
//! Intentional clamping inside the matching/idle math (delta-proportion
//! caps, supply-cap diversion into idle) is design behavior, not an error.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::ids::{Asset, UserId};

/// Central error enum for all PeerLend operations.
#[derive(Debug, Error)]
pub enum PeerlendError {
    // =================================================================
    // Input Errors (1xx)
    // =================================================================
    /// The operation was called with a zero amount.
    #[error("PL_ERR_100: Amount is zero")]
    AmountIsZero,

    /// The target market has not been created.
    #[error("PL_ERR_101: Market not created: {0}")]
    MarketNotCreated(Asset),

    /// A market for this underlying already exists.
    #[error("PL_ERR_102: Market already created: {0}")]
    MarketAlreadyCreated(Asset),

    /// Market parameters failed validation at creation.
    #[error("PL_ERR_103: Invalid market params: {reason}")]
    InvalidMarketParams { reason: String },

    // =================================================================
    // Policy Errors (2xx)
    // =================================================================
    /// The requested operation is paused for this market.
    #[error("PL_ERR_200: {operation} is paused for market {underlying}")]
    OperationPaused {
        underlying: Asset,
        operation: &'static str,
    },

    /// New borrows are not allowed on a deprecated market.
    #[error("PL_ERR_201: Market deprecated: {0}")]
    MarketDeprecated(Asset),

    // =================================================================
    // Authorization Errors (3xx)
    // =================================================================
    /// The caller has no delegated permission over the target account.
    #[error("PL_ERR_300: Caller {caller} is not a manager of {owner}")]
    PermissionDenied { owner: UserId, caller: UserId },

    // =================================================================
    // Solvency Errors (4xx)
    // =================================================================
    /// The operation would leave the account's health factor below 1.
    #[error("PL_ERR_400: Health factor too low: {health_factor}")]
    HealthFactorTooLow { health_factor: Decimal },

    /// The liquidation target holds no position in the named market.
    #[error("PL_ERR_401: User {user} is not a participant in market {underlying}")]
    UserNotInMarket { user: UserId, underlying: Asset },

    /// The liquidation target is still solvent.
    #[error("PL_ERR_402: Liquidation not allowed: health factor {health_factor}")]
    LiquidationNotAllowed { health_factor: Decimal },

    // =================================================================
    // Arithmetic Errors (5xx)
    // =================================================================
    /// A checked arithmetic operation overflowed. Underflow never occurs:
    /// subtraction is floored at zero throughout the engine.
    #[error("PL_ERR_500: Arithmetic overflow in {context}")]
    ArithmeticOverflow { context: &'static str },

    // =================================================================
    // Collaborator Errors (6xx)
    // =================================================================
    /// The price oracle returned no usable price for an asset.
    #[error("PL_ERR_600: Price unavailable for asset: {0}")]
    PriceUnavailable(Asset),

    /// The underlying pool rejected a supply/withdraw/borrow/repay call.
    #[error("PL_ERR_601: Pool operation failed: {reason}")]
    PoolOperationFailed { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("PL_ERR_900: Internal error: {0}")]
    Internal(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, PeerlendError>;

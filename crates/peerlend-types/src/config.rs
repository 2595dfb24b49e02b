//! Configuration types for PeerLend markets and the engine.

use serde::{Deserialize, Serialize};

use crate::constants::{self, BPS_FACTOR};
use crate::error::{PeerlendError, Result};

/// Per-market rate parameters, set at market creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketParams {
    /// Share of the peer-to-peer spread kept by the protocol, in bps.
    pub reserve_factor_bps: u16,
    /// Position of the peer-to-peer rate between the pool supply and borrow
    /// rates, in bps (0 = pool supply rate, 10_000 = pool borrow rate).
    pub p2p_index_cursor_bps: u16,
}

impl MarketParams {
    #[must_use]
    pub fn new(reserve_factor_bps: u16, p2p_index_cursor_bps: u16) -> Self {
        Self {
            reserve_factor_bps,
            p2p_index_cursor_bps,
        }
    }

    /// Validate that both parameters are at most 100%.
    pub fn validate(&self) -> Result<()> {
        if u32::from(self.reserve_factor_bps) > BPS_FACTOR {
            return Err(PeerlendError::InvalidMarketParams {
                reason: format!("reserve factor {} bps exceeds 100%", self.reserve_factor_bps),
            });
        }
        if u32::from(self.p2p_index_cursor_bps) > BPS_FACTOR {
            return Err(PeerlendError::InvalidMarketParams {
                reason: format!(
                    "p2p index cursor {} bps exceeds 100%",
                    self.p2p_index_cursor_bps
                ),
            });
        }
        Ok(())
    }
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            reserve_factor_bps: 1_000,
            p2p_index_cursor_bps: 5_000,
        }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Iteration budget used when an operation does not pass its own.
    /// This is the engine's maximum-work-per-call knob: smaller values trade
    /// matching completeness for predictable cost.
    pub default_iteration_budget: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_iteration_budget: constants::DEFAULT_ITERATION_BUDGET,
        }
    }
}

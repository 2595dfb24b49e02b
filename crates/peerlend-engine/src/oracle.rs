//! The price oracle collaborator.

use peerlend_types::Result;
use rust_decimal::Decimal;

/// Per-asset prices in a common base currency. Consumed only by the
/// health-factor and liquidation computations.
pub trait PriceOracle {
    /// The asset's price per unit. Implementations should error rather than
    /// return a stale or zero price.
    fn price(&self, asset: &str) -> Result<Decimal>;
}

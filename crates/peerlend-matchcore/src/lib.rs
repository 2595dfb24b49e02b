//! # peerlend-matchcore
//!
//! **Pure matching and accounting core for PeerLend.**
//!
//! MatchCore is the compute plane — it owns the ranked balance structures
//! and every piece of matching, delta/idle, and interest-index arithmetic.
//! It has:
//!
//! - **Zero side effects**: no pool calls, no oracle reads, no clocks
//! - **Bounded work**: every matching walk honors its iteration budget
//! - **Strict conservation**: promote/demote move value, never create it
//! - **Lazy, idempotent indexes**: at most one refresh per timestamp
//!
//! The position orchestrator in `peerlend-engine` sequences these pieces
//! per operation and talks to the outside world.

pub mod accounting;
pub mod balances;
pub mod indexes;
pub mod matching;
pub mod ranking;

pub use balances::MarketBalances;
pub use indexes::{GrowthFactors, compute_growth_factors, compute_p2p_index, refresh_indexes};
pub use matching::{
    MatchResult, PoolBalanceChange, demote_borrowers, demote_suppliers, promote_borrowers,
    promote_suppliers,
};
pub use ranking::BalanceRanking;

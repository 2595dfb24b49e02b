//! The bounded promote/demote matching loops.
//!
//! One transfer loop drives all four movements: it repeatedly takes the head
//! of the donor ranking and moves `min(donor value, remaining)` from the
//! donor bucket to the recipient bucket of the same user, until the amount
//! is exhausted, the iteration budget is spent, or the donor ranking is
//! empty. The last two are not errors — the caller routes the remainder to
//! the pool-direct or delta-fallback path.
//!
//! ## Conservation
//!
//! Within one iteration, the value removed from the donor bucket equals the
//! value added to the recipient bucket for that user, up to one rounding
//! unit from the scaled-balance division.

use peerlend_types::{MarketSideIndexes, UserId, math::zero_floor_sub};
use rust_decimal::Decimal;

use crate::balances::MarketBalances;
use crate::ranking::BalanceRanking;

/// A pool-side balance that changed during matching, with its prior value —
/// the payload the reward tracker wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolBalanceChange {
    pub user: UserId,
    pub previous_scaled_pool: Decimal,
}

/// Outcome of a single promote/demote call.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Volume moved between placements, in underlying units. Never exceeds
    /// the requested amount.
    pub matched: Decimal,
    /// Distinct users touched. Never exceeds the budget.
    pub iterations_used: u32,
    /// Pool-side balance changes, one per touched user.
    pub touched: Vec<PoolBalanceChange>,
}

/// Move pool suppliers into peer-to-peer, largest balance first.
pub fn promote_suppliers(
    balances: &mut MarketBalances,
    indexes: &MarketSideIndexes,
    amount: Decimal,
    budget: u32,
) -> MatchResult {
    transfer(
        &mut balances.pool_suppliers,
        &mut balances.p2p_suppliers,
        indexes.pool_index,
        indexes.p2p_index,
        amount,
        budget,
        PoolEnd::Donor,
    )
}

/// Move pool borrowers into peer-to-peer, largest balance first.
pub fn promote_borrowers(
    balances: &mut MarketBalances,
    indexes: &MarketSideIndexes,
    amount: Decimal,
    budget: u32,
) -> MatchResult {
    transfer(
        &mut balances.pool_borrowers,
        &mut balances.p2p_borrowers,
        indexes.pool_index,
        indexes.p2p_index,
        amount,
        budget,
        PoolEnd::Donor,
    )
}

/// Move peer-to-peer suppliers back to the pool, largest balance first.
pub fn demote_suppliers(
    balances: &mut MarketBalances,
    indexes: &MarketSideIndexes,
    amount: Decimal,
    budget: u32,
) -> MatchResult {
    transfer(
        &mut balances.p2p_suppliers,
        &mut balances.pool_suppliers,
        indexes.p2p_index,
        indexes.pool_index,
        amount,
        budget,
        PoolEnd::Recipient,
    )
}

/// Move peer-to-peer borrowers back to the pool, largest balance first.
pub fn demote_borrowers(
    balances: &mut MarketBalances,
    indexes: &MarketSideIndexes,
    amount: Decimal,
    budget: u32,
) -> MatchResult {
    transfer(
        &mut balances.p2p_borrowers,
        &mut balances.pool_borrowers,
        indexes.p2p_index,
        indexes.pool_index,
        amount,
        budget,
        PoolEnd::Recipient,
    )
}

/// Which end of the transfer is the pool placement (for reward reporting).
#[derive(Clone, Copy)]
enum PoolEnd {
    Donor,
    Recipient,
}

fn transfer(
    donor: &mut BalanceRanking,
    recipient: &mut BalanceRanking,
    donor_index: Decimal,
    recipient_index: Decimal,
    amount: Decimal,
    budget: u32,
    pool_end: PoolEnd,
) -> MatchResult {
    let mut remaining = amount;
    let mut iterations_used = 0u32;
    let mut touched = Vec::new();

    while remaining > Decimal::ZERO && iterations_used < budget {
        let Some((user, donor_scaled)) = donor.head() else {
            break;
        };
        iterations_used += 1;

        let donor_value = donor_scaled * donor_index;
        let to_process = donor_value.min(remaining);
        remaining -= to_process;

        // A full move zeroes the donor bucket exactly, leaving no dust.
        let new_donor_scaled = if to_process == donor_value {
            Decimal::ZERO
        } else {
            zero_floor_sub(donor_scaled, to_process / donor_index)
        };
        let recipient_scaled = recipient.value_of(&user);

        donor.upsert(user, new_donor_scaled);
        recipient.upsert(user, recipient_scaled + to_process / recipient_index);

        touched.push(PoolBalanceChange {
            user,
            previous_scaled_pool: match pool_end {
                PoolEnd::Donor => donor_scaled,
                PoolEnd::Recipient => recipient_scaled,
            },
        });

        tracing::debug!(
            user = %user,
            moved = %to_process,
            remaining = %remaining,
            "Matched against ranking head"
        );
    }

    MatchResult {
        matched: amount - remaining,
        iterations_used,
        touched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn unit_indexes() -> MarketSideIndexes {
        MarketSideIndexes {
            pool_index: Decimal::ONE,
            p2p_index: Decimal::ONE,
        }
    }

    #[test]
    fn promote_moves_largest_first() {
        let mut balances = MarketBalances::new();
        let (a, b) = (UserId::new(), UserId::new());
        balances.set_pool_supply(a, dec(100));
        balances.set_pool_supply(b, dec(300));

        let result = promote_suppliers(&mut balances, &unit_indexes(), dec(250), 10);

        assert_eq!(result.matched, dec(250));
        assert_eq!(result.iterations_used, 1);
        // b had 300 on pool: 250 promoted, 50 left.
        assert_eq!(balances.scaled_pool_supply(&b), dec(50));
        assert_eq!(balances.scaled_p2p_supply(&b), dec(250));
        // a untouched.
        assert_eq!(balances.scaled_pool_supply(&a), dec(100));
    }

    #[test]
    fn promote_stops_when_ranking_empty() {
        let mut balances = MarketBalances::new();
        let a = UserId::new();
        balances.set_pool_borrow(a, dec(100));

        let result = promote_borrowers(&mut balances, &unit_indexes(), dec(500), 10);

        assert_eq!(result.matched, dec(100));
        assert_eq!(result.iterations_used, 1);
        assert!(balances.pool_borrowers.is_empty());
        assert_eq!(balances.scaled_p2p_borrow(&a), dec(100));
    }

    #[test]
    fn budget_bounds_distinct_users_touched() {
        let mut balances = MarketBalances::new();
        for _ in 0..20 {
            balances.set_pool_supply(UserId::new(), dec(10));
        }

        let result = promote_suppliers(&mut balances, &unit_indexes(), dec(1_000), 5);

        assert_eq!(result.iterations_used, 5);
        assert_eq!(result.touched.len(), 5);
        assert_eq!(result.matched, dec(50));
        assert_eq!(balances.pool_suppliers.len(), 15);
    }

    #[test]
    fn zero_budget_moves_nothing() {
        let mut balances = MarketBalances::new();
        balances.set_pool_supply(UserId::new(), dec(100));

        let result = promote_suppliers(&mut balances, &unit_indexes(), dec(100), 0);

        assert_eq!(result.matched, Decimal::ZERO);
        assert_eq!(result.iterations_used, 0);
        assert!(result.touched.is_empty());
    }

    #[test]
    fn demote_mirrors_promote() {
        let mut balances = MarketBalances::new();
        let a = UserId::new();
        balances.set_p2p_borrow(a, dec(80));

        let result = demote_borrowers(&mut balances, &unit_indexes(), dec(30), 10);

        assert_eq!(result.matched, dec(30));
        assert_eq!(balances.scaled_p2p_borrow(&a), dec(50));
        assert_eq!(balances.scaled_pool_borrow(&a), dec(30));
        // The pool end is the recipient: previous pool balance was zero.
        assert_eq!(result.touched[0].previous_scaled_pool, Decimal::ZERO);
    }

    #[test]
    fn conservation_with_distinct_indexes() {
        let mut balances = MarketBalances::new();
        let a = UserId::new();
        balances.set_pool_supply(a, dec(100));
        let indexes = MarketSideIndexes {
            pool_index: Decimal::new(12, 1), // 1.2
            p2p_index: Decimal::new(11, 1),  // 1.1
        };

        let result = promote_suppliers(&mut balances, &indexes, dec(60), 10);

        assert_eq!(result.matched, dec(60));
        // Donor value removed: 100*1.2 - 50*1.2 = 60.
        assert_eq!(balances.scaled_pool_supply(&a), dec(50));
        // Recipient value added: (60/1.1)*1.1 = 60.
        let p2p_value = balances.scaled_p2p_supply(&a) * indexes.p2p_index;
        assert!((p2p_value - dec(60)).abs() < Decimal::new(1, 10));
    }

    #[test]
    fn partial_fill_leaves_head_in_place() {
        let mut balances = MarketBalances::new();
        let a = UserId::new();
        balances.set_pool_supply(a, dec(100));

        let first = promote_suppliers(&mut balances, &unit_indexes(), dec(40), 10);
        assert_eq!(first.matched, dec(40));

        // The user still heads the ranking with the reduced balance.
        assert_eq!(balances.pool_suppliers.head(), Some((a, dec(60))));
    }

    #[test]
    fn touched_reports_previous_pool_balance() {
        let mut balances = MarketBalances::new();
        let a = UserId::new();
        balances.set_pool_supply(a, dec(100));

        let result = promote_suppliers(&mut balances, &unit_indexes(), dec(100), 10);

        assert_eq!(
            result.touched,
            vec![PoolBalanceChange {
                user: a,
                previous_scaled_pool: dec(100)
            }]
        );
    }

    #[test]
    fn randomized_matching_conserves_value() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let mut balances = MarketBalances::new();
        let mut total = Decimal::ZERO;
        for _ in 0..50 {
            let value = dec(rng.gen_range(1..10_000));
            balances.set_pool_supply(UserId::new(), value);
            total += value;
        }

        let requested = total / Decimal::TWO;
        let result = promote_suppliers(&mut balances, &unit_indexes(), requested, 50);

        // With unit indexes, scaled totals are values: nothing leaks.
        let pool_total = balances.pool_suppliers.total();
        let p2p_total = balances.p2p_suppliers.total();
        assert_eq!(p2p_total, result.matched);
        assert_eq!(pool_total + p2p_total, total);
        assert!(result.matched <= requested);
    }
}

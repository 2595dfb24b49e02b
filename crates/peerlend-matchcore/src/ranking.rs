//! The ranked scaled-balance structure backing the matching engine.
//!
//! Uses a `BTreeMap` keyed on `(Reverse(balance), update_seq)`:
//! - `head()` is the entry with the **largest** scaled balance;
//! - ties break toward the **least-recently-updated** entry (smallest
//!   update sequence number), which is deterministic and reproducible.
//!
//! An auxiliary `HashMap<UserId, RankKey>` enables O(log N) upsert/remove.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use peerlend_types::UserId;
use rust_decimal::Decimal;

/// Composite ordering key: balance descending, then update sequence ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RankKey {
    value: Reverse<Decimal>,
    seq: u64,
}

/// A per-market, per-side, per-placement ranking of user scaled balances.
#[derive(Debug, Clone, Default)]
pub struct BalanceRanking {
    entries: BTreeMap<RankKey, UserId>,
    index: HashMap<UserId, RankKey>,
    next_seq: u64,
}

impl BalanceRanking {
    /// Create a new empty ranking.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a user's scaled balance. A zero balance removes the
    /// entry. Every upsert counts as an update for tie-break purposes: among
    /// equal balances, the entry updated longest ago ranks first.
    pub fn upsert(&mut self, user: UserId, value: Decimal) {
        if let Some(key) = self.index.remove(&user) {
            self.entries.remove(&key);
        }
        if value.is_zero() {
            return;
        }
        let key = RankKey {
            value: Reverse(value),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, user);
        self.index.insert(user, key);
    }

    /// Remove a user. Returns the removed scaled balance, if any.
    pub fn remove(&mut self, user: &UserId) -> Option<Decimal> {
        let key = self.index.remove(user)?;
        self.entries.remove(&key);
        Some(key.value.0)
    }

    /// The user with the largest scaled balance, with that balance.
    #[must_use]
    pub fn head(&self) -> Option<(UserId, Decimal)> {
        self.entries
            .first_key_value()
            .map(|(key, user)| (*user, key.value.0))
    }

    /// The user's scaled balance, or zero if absent.
    #[must_use]
    pub fn value_of(&self, user: &UserId) -> Decimal {
        self.index
            .get(user)
            .map_or(Decimal::ZERO, |key| key.value.0)
    }

    /// Whether the user has a live entry.
    #[must_use]
    pub fn contains(&self, user: &UserId) -> bool {
        self.index.contains_key(user)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the ranking holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in rank order (largest balance first).
    pub fn iter(&self) -> impl Iterator<Item = (UserId, Decimal)> + '_ {
        self.entries.iter().map(|(key, user)| (*user, key.value.0))
    }

    /// Sum of all scaled balances in the ranking.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.entries.keys().map(|key| key.value.0).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    #[test]
    fn head_is_largest_balance() {
        let mut ranking = BalanceRanking::new();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        ranking.upsert(a, dec(100));
        ranking.upsert(b, dec(300));
        ranking.upsert(c, dec(200));

        assert_eq!(ranking.head(), Some((b, dec(300))));
        assert_eq!(ranking.len(), 3);
    }

    #[test]
    fn ties_break_toward_least_recently_updated() {
        let mut ranking = BalanceRanking::new();
        let (a, b) = (UserId::new(), UserId::new());
        ranking.upsert(a, dec(100));
        ranking.upsert(b, dec(100));
        assert_eq!(ranking.head(), Some((a, dec(100))));

        // Re-upserting `a` at the same balance makes it most-recently-updated,
        // so `b` takes the head.
        ranking.upsert(a, dec(100));
        assert_eq!(ranking.head(), Some((b, dec(100))));
    }

    #[test]
    fn upsert_replaces_previous_value() {
        let mut ranking = BalanceRanking::new();
        let a = UserId::new();
        ranking.upsert(a, dec(100));
        ranking.upsert(a, dec(50));
        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking.value_of(&a), dec(50));
    }

    #[test]
    fn zero_upsert_removes_entry() {
        let mut ranking = BalanceRanking::new();
        let a = UserId::new();
        ranking.upsert(a, dec(100));
        ranking.upsert(a, Decimal::ZERO);
        assert!(ranking.is_empty());
        assert!(!ranking.contains(&a));
        assert_eq!(ranking.value_of(&a), Decimal::ZERO);
    }

    #[test]
    fn remove_returns_balance() {
        let mut ranking = BalanceRanking::new();
        let a = UserId::new();
        ranking.upsert(a, dec(70));
        assert_eq!(ranking.remove(&a), Some(dec(70)));
        assert_eq!(ranking.remove(&a), None);
    }

    #[test]
    fn update_does_not_corrupt_other_entries() {
        let mut ranking = BalanceRanking::new();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        ranking.upsert(a, dec(300));
        ranking.upsert(b, dec(200));
        ranking.upsert(c, dec(100));

        ranking.upsert(a, dec(50));
        let order: Vec<UserId> = ranking.iter().map(|(user, _)| user).collect();
        assert_eq!(order, vec![b, c, a]);
        assert_eq!(ranking.total(), dec(350));
    }

    #[test]
    fn empty_ranking() {
        let ranking = BalanceRanking::new();
        assert_eq!(ranking.head(), None);
        assert!(ranking.is_empty());
        assert_eq!(ranking.total(), Decimal::ZERO);
    }
}

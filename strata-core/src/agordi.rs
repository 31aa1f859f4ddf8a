//! Agordi order-invariant aggregating hash for multisets of small unsigned
//! integers.
//!
//! The accumulator tracks the sum and the sum of squares of the inserted
//! items, each split into a low word and an explicit carry word so the state
//! is exact rather than modular. Insertion order never affects the state
//! (`add(x); add(y)` equals `add(y); add(x)`), partial hashes combine
//! associatively, and the empty accumulator is the all-zero value.
//!
//! The pair (Σx, Σx²) does not determine a multiset on its own: `{1, 7, 10}`
//! and `{2, 5, 11}` share both sums. Correcting every item upward by
//! ⌊√(u32::MAX)⌋ before hashing removes that collision family, at the cost of
//! shrinking the usable item range from the top by the same amount.
//!
//! The clusterer uses the hash to bucket items whose candidate sets coincide,
//! replacing quadratic set comparisons with digest lookups; bucket members
//! are still verified by exact set equality, so a digest collision can only
//! cost time.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Item correction strategy applied before hashing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Correction {
    /// Hash items as supplied. Fast, but susceptible to the documented
    /// sum/square collision family.
    None,
    /// Add ⌊√(u32::MAX)⌋ to every item, making (Σx, Σx²) injective over the
    /// reduced item range.
    #[default]
    CorAll,
}

/// Value added to every item under [`Correction::CorAll`].
pub const COR_VAL: u32 = 65_535; // floor(sqrt(u32::MAX))

/// Incremental order-invariant fingerprint of a multiset of `u32` items.
#[derive(Clone, Copy, Debug)]
pub struct AgordiHash {
    /// Low word of the item sum.
    lsum: u32,
    /// Carry word of the item sum.
    hsum: u32,
    /// Carry word of the squared-item sum.
    hv2sum: u32,
    /// Low word of the squared-item sum.
    lv2sum: u64,
    corr: Correction,
    saturated: bool,
}

impl AgordiHash {
    /// Creates an empty accumulator with the given correction strategy.
    #[must_use]
    pub fn new(corr: Correction) -> Self {
        Self {
            lsum: 0,
            hsum: 0,
            hv2sum: 0,
            lv2sum: 0,
            corr,
            saturated: false,
        }
    }

    /// Resets the accumulator to the empty state, keeping the strategy.
    pub fn clear(&mut self) {
        self.lsum = 0;
        self.hsum = 0;
        self.hv2sum = 0;
        self.lv2sum = 0;
        self.saturated = false;
    }

    /// Whether no items have been hashed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lsum == 0 && self.hsum == 0 && self.hv2sum == 0 && self.lv2sum == 0
    }

    /// Whether a carry word or a corrected item overflowed its budget.
    ///
    /// A saturated hash no longer identifies its multiset; callers must
    /// refuse the input rather than compare saturated digests.
    #[must_use]
    pub fn saturated(&self) -> bool {
        self.saturated
    }

    /// Adds one item to the hash.
    pub fn add(&mut self, v: u32) {
        let v = match self.corr {
            Correction::None => v,
            Correction::CorAll => {
                let (cv, over) = v.overflowing_add(COR_VAL);
                if over {
                    self.saturated = true;
                    return;
                }
                cv
            }
        };
        let (lsum, carry) = self.lsum.overflowing_add(v);
        self.lsum = lsum;
        self.hsum = match self.hsum.checked_add(u32::from(carry)) {
            Some(h) => h,
            None => {
                self.saturated = true;
                u32::MAX
            }
        };

        let sq = u64::from(v) * u64::from(v);
        let (lv2, carry2) = self.lv2sum.overflowing_add(sq);
        self.lv2sum = lv2;
        self.hv2sum = match self.hv2sum.checked_add(u32::from(carry2)) {
            Some(h) => h,
            None => {
                self.saturated = true;
                u32::MAX
            }
        };
    }

    /// Folds another accumulator in: `h(a ∪ b) = h(a) + h(b)`.
    pub fn add_hash(&mut self, other: &Self) {
        debug_assert_eq!(self.corr, other.corr, "mixed correction strategies");
        let (lsum, carry) = self.lsum.overflowing_add(other.lsum);
        self.lsum = lsum;
        self.hsum = match self
            .hsum
            .checked_add(u32::from(carry))
            .and_then(|h| h.checked_add(other.hsum))
        {
            Some(h) => h,
            None => {
                self.saturated = true;
                u32::MAX
            }
        };

        let (lv2, carry2) = self.lv2sum.overflowing_add(other.lv2sum);
        self.lv2sum = lv2;
        self.hv2sum = match self
            .hv2sum
            .checked_add(u32::from(carry2))
            .and_then(|h| h.checked_add(other.hv2sum))
        {
            Some(h) => h,
            None => {
                self.saturated = true;
                u32::MAX
            }
        };
        self.saturated |= other.saturated;
    }

    /// Mixes the state down to a single word.
    ///
    /// The digest trades the exactness of the full state for table lookup
    /// speed; colliding digests are resolved by comparing the full hashes.
    #[must_use]
    pub fn digest(&self) -> u64 {
        let mut res = self.lv2sum;
        res ^= u64::from(self.lsum.swap_bytes());
        res ^= u64::from(self.hsum ^ self.hv2sum.swap_bytes()) << 32;
        res
    }

    fn key(&self) -> (u32, u32, u32, u64) {
        (self.lsum, self.hsum, self.hv2sum, self.lv2sum)
    }
}

impl PartialEq for AgordiHash {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for AgordiHash {}

impl PartialOrd for AgordiHash {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AgordiHash {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for AgordiHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.digest());
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn hash_of(items: &[u32], corr: Correction) -> AgordiHash {
        let mut h = AgordiHash::new(corr);
        for &v in items {
            h.add(v);
        }
        h
    }

    #[rstest]
    #[case(Correction::None)]
    #[case(Correction::CorAll)]
    fn order_invariance(#[case] corr: Correction) {
        let fwd = hash_of(&[3, 11, 29, 11], corr);
        let rev = hash_of(&[11, 29, 11, 3], corr);
        assert_eq!(fwd, rev);
        assert_eq!(fwd.digest(), rev.digest());
    }

    #[test]
    fn empty_is_all_zero() {
        let h = AgordiHash::new(Correction::CorAll);
        assert!(h.is_empty());
        assert_eq!(h.digest(), 0);
    }

    #[test]
    fn documented_collision_family() {
        // Σ = 18 and Σ² = 150 for both sets; only the correction separates
        // them.
        let a = hash_of(&[1, 7, 10], Correction::None);
        let b = hash_of(&[2, 5, 11], Correction::None);
        assert_eq!(a, b);

        let a = hash_of(&[1, 7, 10], Correction::CorAll);
        let b = hash_of(&[2, 5, 11], Correction::CorAll);
        assert_ne!(a, b);
    }

    #[test]
    fn chunk_merge_is_associative() {
        let whole = hash_of(&[5, 9, 2, 40], Correction::CorAll);
        let mut left = hash_of(&[5, 9], Correction::CorAll);
        let right = hash_of(&[2, 40], Correction::CorAll);
        left.add_hash(&right);
        assert_eq!(whole, left);
    }

    #[test]
    fn corrected_item_near_max_saturates() {
        let mut h = AgordiHash::new(Correction::CorAll);
        h.add(u32::MAX - COR_VAL / 2);
        assert!(h.saturated());
    }

    #[test]
    fn ordering_is_total_and_consistent_with_eq() {
        let a = hash_of(&[1, 2], Correction::CorAll);
        let b = hash_of(&[1, 3], Correction::CorAll);
        assert_ne!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a.cmp(&a), Ordering::Equal);
    }

    proptest! {
        #[test]
        fn permutation_invariance(mut items in proptest::collection::vec(0u32..1_000_000, 0..64)) {
            let fwd = hash_of(&items, Correction::CorAll);
            items.reverse();
            let rev = hash_of(&items, Correction::CorAll);
            prop_assert_eq!(fwd, rev);
        }

        #[test]
        fn split_merge_equals_whole(items in proptest::collection::vec(0u32..1_000_000, 1..64), split in 0usize..64) {
            let split = split % items.len();
            let whole = hash_of(&items, Correction::CorAll);
            let mut left = hash_of(&items[..split], Correction::CorAll);
            let right = hash_of(&items[split..], Correction::CorAll);
            left.add_hash(&right);
            prop_assert_eq!(whole, left);
        }
    }
}

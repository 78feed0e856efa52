//! Growable bit sets of small non-negative integers, with an O(1) complement.

use bitvec::prelude::{BitVec, Lsb0};

use crate::catalog::Personality;

/// Set of non-negative integers, stored as a bit vector plus a complement flag.
///
/// Membership of `n` is `bit(n) ^ complement`. Storage grows on demand and never shrinks,
/// so "everything except {a, b}" is representable without enumerating a universe.
#[derive(Clone, Debug, Default)]
pub struct NumberSet {
    bits: BitVec<u32, Lsb0>,
    complement: bool,
}

impl NumberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set containing every number.
    pub fn all() -> Self {
        let mut set = Self::new();
        set.invert();
        set
    }

    /// Set the bit for `n`.
    ///
    /// Under a complemented set this removes `n` from the membership.
    pub fn add(&mut self, n: u32) {
        let n = n as usize;

        if n >= self.bits.len() {
            self.bits.resize(n + 1, false);
        }

        self.bits.set(n, true);
    }

    /// Make `n` a member, whether or not the set is complemented.
    pub fn include(&mut self, n: u32) {
        if !self.complement {
            self.add(n);
            return;
        }

        let n = n as usize;

        if n < self.bits.len() {
            self.bits.set(n, false);
        }
    }

    pub fn contains(&self, n: u32) -> bool {
        let set = self.bits.get(n as usize).map(|b| *b).unwrap_or(false);

        set ^ self.complement
    }

    /// Remove every bit and drop the complement.
    pub fn clear(&mut self) {
        self.bits.clear();
        self.complement = false;
    }

    pub fn invert(&mut self) {
        self.complement = !self.complement;
    }

    pub fn is_complemented(&self) -> bool {
        self.complement
    }

    /// True if no number is a member.
    pub fn is_empty(&self) -> bool {
        !self.complement && self.bits.not_any()
    }

    /// True if every number in `0..universe` is a member.
    pub fn is_complete(&self, universe: u32) -> bool {
        (0..universe).all(|n| self.contains(n))
    }
}

// Equal membership, regardless of how far storage has grown.
impl PartialEq for NumberSet {
    fn eq(&self, other: &Self) -> bool {
        self.complement == other.complement && self.bits.iter_ones().eq(other.bits.iter_ones())
    }
}

impl Eq for NumberSet {}

/// One [`NumberSet`] per personality.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NumberSetArray {
    sets: Vec<NumberSet>,
}

impl NumberSetArray {
    pub fn new(personalities: usize) -> Self {
        let sets = vec![NumberSet::new(); personalities];
        Self { sets }
    }

    pub fn all(personalities: usize) -> Self {
        let mut sets = Self::new(personalities);
        sets.invert();
        sets
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn get(&self, p: Personality) -> &NumberSet {
        &self.sets[p.index()]
    }

    pub fn get_mut(&mut self, p: Personality) -> &mut NumberSet {
        &mut self.sets[p.index()]
    }

    pub fn add(&mut self, n: u32, p: Personality) {
        self.get_mut(p).add(n);
    }

    /// Membership of `n` for personality `p`. Personalities outside the array hold nothing.
    pub fn contains(&self, n: u32, p: Personality) -> bool {
        self.sets
            .get(p.index())
            .map(|set| set.contains(n))
            .unwrap_or(false)
    }

    pub fn clear(&mut self) {
        self.sets.iter_mut().for_each(NumberSet::clear);
    }

    pub fn invert(&mut self) {
        self.sets.iter_mut().for_each(NumberSet::invert);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Personality, &NumberSet)> {
        self.sets
            .iter()
            .enumerate()
            .map(|(i, set)| (Personality::new(i), set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_keeps_prior_bits() {
        let mut set = NumberSet::new();
        set.add(3);
        set.add(100_000);

        assert!(set.contains(3));
        assert!(set.contains(100_000));
        assert!(!set.contains(4));
        assert!(!set.contains(99_999));
        assert!(set.bits.len() > 100_000);
    }

    #[test]
    fn test_include_under_complement() {
        let mut set = NumberSet::all();
        set.add(5);
        assert!(!set.contains(5));

        set.include(5);
        set.include(6);
        assert!(set.contains(5));
        assert!(set.contains(6));
    }

    #[test]
    fn test_equality_ignores_storage_length() {
        let short = NumberSet::all();

        let mut long = NumberSet::all();
        long.add(5000);
        long.include(5000);

        assert_eq!(short, long);

        long.invert();
        assert_ne!(short, long);
    }
}

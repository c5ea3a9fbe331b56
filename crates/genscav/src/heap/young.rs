//! Young Generation - eden and the survivor spaces
//!
//! ```text
//!   eden (age 0) ─┐
//!                 ├─► survivor_to[0] (age 1) ─► ... ─► survivor_to[N-1] (age N) ─► old
//!   from[i] ──────┘
//! ```
//!
//! Mutators retire their chunks into eden. An incremental collection evacuates
//! eden and every `survivor_from[i]`; an object of age `a` moves to
//! `survivor_to[a]` while `a + 1` does not exceed the tenuring age, and to the old
//! generation otherwise. Afterwards from and to swap roles, so the survivors
//! become next collection's from-spaces.

use crate::heap::accounting::ChunksAccounting;
use crate::heap::space::{GenerationKind, Space, SpaceId};

pub struct YoungGeneration {
    eden: SpaceId,
    survivor_from: Vec<SpaceId>,
    survivor_to: Vec<SpaceId>,
    accounting: ChunksAccounting,
}

impl YoungGeneration {
    /// Create eden and `2 * max_survivor_spaces` survivor spaces at the end of `spaces`
    pub fn new(spaces: &mut Vec<Space>, max_survivor_spaces: usize) -> Self {
        let eden = SpaceId::from_raw(spaces.len());
        spaces.push(Space::new(eden, "eden", GenerationKind::Young, 0));

        let mut survivor_from = Vec::with_capacity(max_survivor_spaces);
        let mut survivor_to = Vec::with_capacity(max_survivor_spaces);
        for i in 0..max_survivor_spaces {
            let age = i + 1;
            let a = SpaceId::from_raw(spaces.len());
            spaces.push(Space::new(a, format!("survivor-{}a", age), GenerationKind::Young, age));
            let b = SpaceId::from_raw(spaces.len());
            spaces.push(Space::new(b, format!("survivor-{}b", age), GenerationKind::Young, age));
            survivor_from.push(a);
            survivor_to.push(b);
        }

        Self {
            eden,
            survivor_from,
            survivor_to,
            accounting: ChunksAccounting::new(),
        }
    }

    pub fn eden(&self) -> SpaceId {
        self.eden
    }

    pub fn max_survivor_spaces(&self) -> usize {
        self.survivor_from.len()
    }

    /// Survivor space currently holding objects of age `index + 1`
    pub fn survivor_from(&self, index: usize) -> SpaceId {
        self.survivor_from[index]
    }

    /// Survivor space receiving objects of age `index + 1` in this collection
    pub fn survivor_to(&self, index: usize) -> SpaceId {
        self.survivor_to[index]
    }

    pub fn survivor_to_spaces(&self) -> &[SpaceId] {
        &self.survivor_to
    }

    /// Spaces an incremental collection evacuates
    pub fn from_spaces(&self) -> Vec<SpaceId> {
        std::iter::once(self.eden)
            .chain(self.survivor_from.iter().copied())
            .collect()
    }

    /// Every young space, eden first
    pub fn all_spaces(&self) -> Vec<SpaceId> {
        std::iter::once(self.eden)
            .chain(self.survivor_from.iter().copied())
            .chain(self.survivor_to.iter().copied())
            .collect()
    }

    /// Where a surviving object of `age` goes; `None` means the old generation
    pub fn promotion_target(&self, age: usize, tenuring_age: usize) -> Option<SpaceId> {
        let tenuring_age = tenuring_age.min(self.max_survivor_spaces());
        if age < self.max_survivor_spaces() && age < tenuring_age {
            Some(self.survivor_to[age])
        } else {
            None
        }
    }

    /// Flip from and to after a collection emptied the from-spaces
    pub fn swap_survivor_spaces(&mut self) {
        std::mem::swap(&mut self.survivor_from, &mut self.survivor_to);
    }

    pub fn accounting(&self) -> &ChunksAccounting {
        &self.accounting
    }

    pub(crate) fn accounting_mut(&mut self) -> &mut ChunksAccounting {
        &mut self.accounting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_of_spaces() {
        let mut spaces = Vec::new();
        let young = YoungGeneration::new(&mut spaces, 2);
        assert_eq!(spaces.len(), 5);
        assert_eq!(young.eden().index(), 0);
        assert_eq!(spaces[young.survivor_from(1).index()].age(), 2);
        assert_eq!(spaces[young.survivor_to(1).index()].age(), 2);
        assert_eq!(young.from_spaces().len(), 3);
        assert_eq!(young.all_spaces().len(), 5);
    }

    #[test]
    fn test_promotion_targets_follow_tenuring_age() {
        let mut spaces = Vec::new();
        let young = YoungGeneration::new(&mut spaces, 2);

        assert_eq!(young.promotion_target(0, 1), Some(young.survivor_to(0)));
        assert_eq!(young.promotion_target(1, 1), None);
        assert_eq!(young.promotion_target(1, 2), Some(young.survivor_to(1)));
        assert_eq!(young.promotion_target(2, 2), None);
        assert_eq!(young.promotion_target(0, 0), None);
        // clamped to the number of survivor spaces
        assert_eq!(young.promotion_target(2, 15), None);
    }

    #[test]
    fn test_swap_flips_roles() {
        let mut spaces = Vec::new();
        let mut young = YoungGeneration::new(&mut spaces, 1);
        let (from, to) = (young.survivor_from(0), young.survivor_to(0));
        young.swap_survivor_spaces();
        assert_eq!(young.survivor_from(0), to);
        assert_eq!(young.survivor_to(0), from);
    }

    #[test]
    fn test_no_survivor_spaces_tenures_everything() {
        let mut spaces = Vec::new();
        let young = YoungGeneration::new(&mut spaces, 0);
        assert_eq!(spaces.len(), 1);
        assert_eq!(young.promotion_target(0, 1), None);
    }
}

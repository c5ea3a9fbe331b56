//! Old Generation - where tenured objects live
//!
//! Two strategies, chosen once at start-up:
//!
//! - **Copying**: a `from` and a `to` space. Between collections all old objects
//!   live in `from`. An incremental collection first moves every `from` chunk to
//!   `to` and promotes into `to`; a complete collection evacuates `from` into `to`.
//!   Either way the collection ends by handing every `to` chunk back to `from`.
//! - **Compacting**: one space. Incremental collections append promoted objects;
//!   complete collections mark, plan, fix and slide objects towards the start of
//!   the chunk list, sweeping chunks that hold pinned objects instead.
//!
//! The per-object promotion work lives with the collector
//! (`relocate::Collection`); this type decides where promoted objects go and
//! moves chunks between the old spaces.

use crate::config::OldGenerationKind;
use crate::heap::accounting::ChunksAccounting;
use crate::heap::space::{GenerationKind, Space, SpaceId};

pub enum OldGeneration {
    Copying {
        from: SpaceId,
        to: SpaceId,
        accounting: ChunksAccounting,
    },
    Compacting {
        space: SpaceId,
        accounting: ChunksAccounting,
    },
}

impl OldGeneration {
    /// Create the old spaces at the end of `spaces`
    pub fn new(kind: OldGenerationKind, spaces: &mut Vec<Space>, age: usize) -> Self {
        match kind {
            OldGenerationKind::Copying => {
                let from = SpaceId::from_raw(spaces.len());
                spaces.push(Space::new(from, "old-from", GenerationKind::Old, age));
                let to = SpaceId::from_raw(spaces.len());
                spaces.push(Space::new(to, "old-to", GenerationKind::Old, age));
                OldGeneration::Copying {
                    from,
                    to,
                    accounting: ChunksAccounting::new(),
                }
            }
            OldGenerationKind::Compacting => {
                let space = SpaceId::from_raw(spaces.len());
                spaces.push(Space::new(space, "old", GenerationKind::Old, age));
                OldGeneration::Compacting {
                    space,
                    accounting: ChunksAccounting::new(),
                }
            }
        }
    }

    pub fn kind(&self) -> OldGenerationKind {
        match self {
            OldGeneration::Copying { .. } => OldGenerationKind::Copying,
            OldGeneration::Compacting { .. } => OldGenerationKind::Compacting,
        }
    }

    /// Space promoted objects are placed in during a collection
    pub fn promotion_target(&self) -> SpaceId {
        match self {
            OldGeneration::Copying { to, .. } => *to,
            OldGeneration::Compacting { space, .. } => *space,
        }
    }

    /// Space old objects live in between collections
    pub fn resident_space(&self) -> SpaceId {
        match self {
            OldGeneration::Copying { from, .. } => *from,
            OldGeneration::Compacting { space, .. } => *space,
        }
    }

    /// Space a complete collection evacuates, if the strategy copies
    pub fn evacuated_space(&self) -> Option<SpaceId> {
        match self {
            OldGeneration::Copying { from, .. } => Some(*from),
            OldGeneration::Compacting { .. } => None,
        }
    }

    pub fn space_ids(&self) -> Vec<SpaceId> {
        match self {
            OldGeneration::Copying { from, to, .. } => vec![*from, *to],
            OldGeneration::Compacting { space, .. } => vec![*space],
        }
    }

    pub fn accounting(&self) -> &ChunksAccounting {
        match self {
            OldGeneration::Copying { accounting, .. }
            | OldGeneration::Compacting { accounting, .. } => accounting,
        }
    }

    pub(crate) fn accounting_mut(&mut self) -> &mut ChunksAccounting {
        match self {
            OldGeneration::Copying { accounting, .. }
            | OldGeneration::Compacting { accounting, .. } => accounting,
        }
    }

    /// Before an incremental collection: every old chunk becomes a promotion target
    pub fn empty_from_space_into_to_space(&self, spaces: &mut [Space]) {
        if let OldGeneration::Copying { from, to, .. } = self {
            Self::move_all(spaces, *from, *to);
        }
    }

    /// After a collection: survivors in `to` become the resident objects
    pub fn swap_spaces(&self, spaces: &mut [Space]) {
        if let OldGeneration::Copying { from, to, .. } = self {
            crate::assert_context!(
                spaces[from.index()].is_empty(),
                "old from-space still holds chunks when swapping"
            );
            Self::move_all(spaces, *to, *from);
        }
    }

    fn move_all(spaces: &mut [Space], source: SpaceId, target: SpaceId) {
        let chunks = spaces[source.index()].take_all_chunks();
        for chunk in chunks {
            spaces[target.index()].append_chunk(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copying_targets() {
        let mut spaces = Vec::new();
        let old = OldGeneration::new(OldGenerationKind::Copying, &mut spaces, 2);
        assert_eq!(spaces.len(), 2);
        assert_eq!(old.kind(), OldGenerationKind::Copying);
        assert_eq!(old.resident_space().index(), 0);
        assert_eq!(old.promotion_target().index(), 1);
        assert_eq!(old.evacuated_space().map(|s| s.index()), Some(0));
        assert!(spaces.iter().all(|s| s.is_old() && s.age() == 2));
    }

    #[test]
    fn test_compacting_uses_one_space() {
        let mut spaces = Vec::new();
        let old = OldGeneration::new(OldGenerationKind::Compacting, &mut spaces, 2);
        assert_eq!(spaces.len(), 1);
        assert_eq!(old.promotion_target(), old.resident_space());
        assert_eq!(old.evacuated_space(), None);
    }
}

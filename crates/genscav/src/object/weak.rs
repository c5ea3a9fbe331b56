//! Weak References Support
//!
//! A reference object holds its referent in slot 0 without keeping it alive.
//! Tracing does not follow that slot; instead the object is discovered, and once
//! tracing is complete every discovered referent is either updated to its new
//! address or cleared.

/// Reference objects found while tracing one collection
#[derive(Debug, Default)]
pub struct DiscoveredReferences {
    objects: Vec<usize>,
    cleared: u64,
    kept: u64,
}

impl DiscoveredReferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reference object at its final address for this collection
    pub fn discover(&mut self, obj: usize) {
        self.objects.push(obj);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Hand out the discovered objects, leaving the list empty
    pub fn take(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.objects)
    }

    pub fn record_cleared(&mut self) {
        self.cleared += 1;
    }

    pub fn record_kept(&mut self) {
        self.kept += 1;
    }

    /// Referents cleared so far
    pub fn cleared(&self) -> u64 {
        self.cleared
    }

    /// Referents that survived and were kept
    pub fn kept(&self) -> u64 {
        self.kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_empties_list() {
        let mut refs = DiscoveredReferences::new();
        refs.discover(0x1000);
        refs.discover(0x2000);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs.take(), vec![0x1000, 0x2000]);
        assert!(refs.is_empty());

        refs.record_cleared();
        refs.record_kept();
        refs.record_kept();
        assert_eq!((refs.cleared(), refs.kept()), (1, 2));
    }
}

//! Placement cache: content fingerprint to atlas rectangle.
//!
//! A fingerprint covers every input that affects the decoded pixels
//! (source address, color mode, palette bank, transparency and flip
//! bits); two draws with equal fingerprints inside one frame share one
//! placement. Entries never survive an atlas reset or reallocation: the
//! cache is keyed to an atlas generation and misses wholesale when the
//! generation moves on.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn of(parts: impl Hash) -> Self {
        let mut hasher = std::hash::DefaultHasher::new();
        parts.hash(&mut hasher);
        Fingerprint(hasher.finish())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Default)]
pub struct PlacementCache {
    entries: HashMap<Fingerprint, Placement>,
    generation: u64,
}

impl PlacementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry and re-key the cache to `atlas_generation`.
    /// Called at frame start and after any event that may have moved
    /// GPU-side storage (atlas reallocation, batch buffer growth).
    pub fn reset(&mut self, atlas_generation: u64) {
        self.entries.clear();
        self.generation = atlas_generation;
    }

    pub fn lookup(&self, atlas_generation: u64, fingerprint: Fingerprint) -> Option<Placement> {
        if atlas_generation != self.generation {
            return None;
        }
        self.entries.get(&fingerprint).copied()
    }

    pub fn register(
        &mut self,
        atlas_generation: u64,
        fingerprint: Fingerprint,
        placement: Placement,
    ) {
        if atlas_generation != self.generation {
            // The atlas moved under us since the last reset; stale entries
            // must not be served, so restart the table at the new generation.
            self.reset(atlas_generation);
        }
        self.entries.insert(fingerprint, placement);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placement(x: u32, y: u32) -> Placement {
        Placement {
            x,
            y,
            width: 32,
            height: 32,
        }
    }

    #[test]
    fn round_trip_until_reset() {
        let mut cache = PlacementCache::new();
        cache.reset(1);
        let fp = Fingerprint::of((0x2_0000u32, 3u8, true));
        cache.register(1, fp, placement(64, 0));
        assert_eq!(cache.lookup(1, fp), Some(placement(64, 0)));
        cache.reset(1);
        assert_eq!(cache.lookup(1, fp), None);
    }

    #[test]
    fn generation_bump_is_a_guaranteed_miss() {
        let mut cache = PlacementCache::new();
        cache.reset(1);
        let fp = Fingerprint::of(0xBEEFu32);
        cache.register(1, fp, placement(0, 0));
        assert_eq!(cache.lookup(2, fp), None);
    }

    #[test]
    fn register_after_generation_bump_drops_stale_entries() {
        let mut cache = PlacementCache::new();
        cache.reset(1);
        let stale = Fingerprint::of(1u32);
        cache.register(1, stale, placement(0, 0));
        let fresh = Fingerprint::of(2u32);
        cache.register(2, fresh, placement(32, 0));
        assert_eq!(cache.lookup(2, stale), None);
        assert_eq!(cache.lookup(2, fresh), Some(placement(32, 0)));
    }
}

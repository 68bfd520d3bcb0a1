//! Identifiers and simple allocators for core entities.

use serde::{Deserialize, Serialize};

/// Handle into the clip store. Resolves to a single clip or a blend-space
/// group; never owns the asset it names.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ClipId(pub u32);

/// One animated character instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CharacterId(pub u32);

/// Stable joint identifier (hash of the joint name, assigned by the skeleton).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct JointId(pub u32);

/// Index handle into the parametric sampler pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SamplerHandle(pub u16);

/// Monotonic allocator for ClipId and CharacterId.
/// Dense indices improve cache locality; IDs are opaque externally.
#[derive(Default, Debug)]
pub struct IdAllocator {
    next_clip: u32,
    next_character: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn alloc_clip(&mut self) -> ClipId {
        let id = ClipId(self.next_clip);
        self.next_clip = self.next_clip.wrapping_add(1);
        id
    }

    #[inline]
    pub fn alloc_character(&mut self) -> CharacterId {
        let id = CharacterId(self.next_character);
        self.next_character = self.next_character.wrapping_add(1);
        id
    }

    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_monotonic() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.alloc_clip(), ClipId(0));
        assert_eq!(alloc.alloc_clip(), ClipId(1));
        assert_eq!(alloc.alloc_character(), CharacterId(0));
        assert_eq!(alloc.alloc_character(), CharacterId(1));
    }
}

//! Identity type for graph nodes.
//!
//! A `TargetId` is a slot index into the graph arena plus the generation the
//! slot had when the node was created. Deleting a node bumps the slot's
//! generation, so stale handles are detected instead of silently aliasing a
//! newer node that reuses the slot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generation-checked handle to a node in a [`RefGraph`](crate::graph::RefGraph).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId {
    index: u32,
    generation: u32,
}

impl TargetId {
    pub const INVALID: TargetId = TargetId {
        index: u32::MAX,
        generation: u32::MAX,
    };

    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "TargetId(INVALID)")
        } else {
            write!(f, "TargetId({}v{})", self.index, self.generation)
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_id() {
        let id = TargetId::new(42, 3);
        assert!(id.is_valid());
        assert_eq!(id.index(), 42);
        assert_eq!(id.generation(), 3);
        assert!(!TargetId::INVALID.is_valid());
        assert!(!TargetId::default().is_valid());
    }

    #[test]
    fn test_generations_distinguish_slot_reuse() {
        let old = TargetId::new(7, 0);
        let reused = TargetId::new(7, 1);
        assert_ne!(old, reused);
        assert_eq!(old.index(), reused.index());
        assert_eq!(format!("{}", reused), "TargetId(7v1)");
    }
}

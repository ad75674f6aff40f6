//! Core type definitions used throughout the crate

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for entities tracked by the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// Axis-aligned bounding box with top-left origin, in world units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Aabb {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// A degenerate box covering a single point. Still occupies one grid cell.
    pub fn point(x: f32, y: f32) -> Self {
        Self { x, y, w: 0.0, h: 0.0 }
    }

    /// Whether these bounds may enter the index: every field finite,
    /// dimensions non-negative. The index silently skips mutations for
    /// bounds that fail this check.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.w.is_finite()
            && self.h.is_finite()
            && self.w >= 0.0
            && self.h >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_validity() {
        assert!(Aabb::new(0.0, 0.0, 16.0, 16.0).is_valid());
        assert!(Aabb::point(-5.0, 3.0).is_valid());
        assert!(!Aabb::new(f32::NAN, 0.0, 1.0, 1.0).is_valid());
        assert!(!Aabb::new(0.0, f32::INFINITY, 1.0, 1.0).is_valid());
        assert!(!Aabb::new(0.0, 0.0, -1.0, 1.0).is_valid());
        assert!(!Aabb::new(0.0, 0.0, 1.0, f32::NEG_INFINITY).is_valid());
    }

    #[test]
    fn test_entity_ids_unique() {
        assert_ne!(EntityId::new(), EntityId::new());
    }
}

//! Per-viewer visibility tracking
//!
//! Each viewer sees every chunk within a Euclidean radius of its current
//! region. On every position update the new set is computed from scratch,
//! diffed against the previous one and swapped in. A reference count per
//! chunk answers "does any viewer see this?" in O(1).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::streaming::coord::ChunkKey;
use crate::streaming::pins::VisibilityIndex;

/// Identity of a viewer, e.g. a connected player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewerId(pub u64);

impl From<u64> for ViewerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Result of a viewer update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityDiff {
    /// Keys in the new set but not the old one, nearest first.
    pub entered: Vec<ChunkKey>,
    /// Keys in the old set but not the new one, in key order.
    pub left: Vec<ChunkKey>,
}

impl VisibilityDiff {
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.left.is_empty()
    }
}

#[derive(Debug)]
struct ViewerState {
    center: ChunkKey,
    radius: u32,
    visible: HashSet<ChunkKey>,
}

/// Visibility sets for all viewers
#[derive(Debug, Default)]
pub struct VisibilityTracker {
    viewers: HashMap<ViewerId, ViewerState>,
    /// Number of viewers that see each key
    references: HashMap<ChunkKey, usize>,
}

impl VisibilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a viewer (creating it on first update) and diff its visible set.
    pub fn update_viewer(
        &mut self,
        viewer: ViewerId,
        center: ChunkKey,
        radius: u32,
    ) -> VisibilityDiff {
        let previous = match self.viewers.get(&viewer) {
            Some(state) if state.center == center && state.radius == radius => {
                return VisibilityDiff::default();
            }
            Some(state) => Some(&state.visible),
            None => None,
        };

        let visible: HashSet<ChunkKey> = center.within_radius(radius).collect();

        let mut entered: Vec<ChunkKey> = match previous {
            Some(old) => visible.difference(old).copied().collect(),
            None => visible.iter().copied().collect(),
        };
        let mut left: Vec<ChunkKey> = match previous {
            Some(old) => old.difference(&visible).copied().collect(),
            None => Vec::new(),
        };
        entered.sort_by_key(|k| (k.distance_squared(center), *k));
        left.sort();

        for key in &entered {
            *self.references.entry(*key).or_insert(0) += 1;
        }
        for key in &left {
            self.release(*key);
        }

        self.viewers.insert(viewer, ViewerState { center, radius, visible });

        VisibilityDiff { entered, left }
    }

    /// Forget a viewer. Every key it saw is reported as left.
    pub fn remove_viewer(&mut self, viewer: ViewerId) -> Vec<ChunkKey> {
        let Some(state) = self.viewers.remove(&viewer) else {
            return Vec::new();
        };
        let mut left: Vec<ChunkKey> = state.visible.into_iter().collect();
        left.sort();
        for key in &left {
            self.release(*key);
        }
        left
    }

    /// Current visible set of a viewer
    pub fn visible(&self, viewer: ViewerId) -> Option<&HashSet<ChunkKey>> {
        self.viewers.get(&viewer).map(|s| &s.visible)
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Number of distinct keys seen by at least one viewer
    pub fn referenced_count(&self) -> usize {
        self.references.len()
    }

    fn release(&mut self, key: ChunkKey) {
        if let Some(count) = self.references.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.references.remove(&key);
            }
        }
    }
}

impl VisibilityIndex for VisibilityTracker {
    fn is_referenced(&self, key: ChunkKey) -> bool {
        self.references.contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ViewerId = ViewerId(1);
    const B: ViewerId = ViewerId(2);

    #[test]
    fn test_first_update_enters_everything() {
        let mut tracker = VisibilityTracker::new();
        let diff = tracker.update_viewer(A, ChunkKey::new(0, 0), 2);

        assert_eq!(diff.entered.len(), 13);
        assert!(diff.left.is_empty());
        // Nearest first
        assert_eq!(diff.entered[0], ChunkKey::new(0, 0));
        assert_eq!(tracker.referenced_count(), 13);
    }

    #[test]
    fn test_unchanged_update_is_empty() {
        let mut tracker = VisibilityTracker::new();
        tracker.update_viewer(A, ChunkKey::new(4, 4), 3);
        let diff = tracker.update_viewer(A, ChunkKey::new(4, 4), 3);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_symmetric_difference() {
        let mut tracker = VisibilityTracker::new();
        let old_center = ChunkKey::new(0, 0);
        let new_center = ChunkKey::new(3, 1);
        let radius = 4;

        tracker.update_viewer(A, old_center, radius);
        let diff = tracker.update_viewer(A, new_center, radius);

        let old: HashSet<_> = old_center.within_radius(radius).collect();
        let new: HashSet<_> = new_center.within_radius(radius).collect();
        let entered: HashSet<_> = diff.entered.iter().copied().collect();
        let left: HashSet<_> = diff.left.iter().copied().collect();

        assert_eq!(entered, new.difference(&old).copied().collect());
        assert_eq!(left, old.difference(&new).copied().collect());
        assert!(entered.is_disjoint(&left));
        assert_eq!(tracker.visible(A), Some(&new));
    }

    #[test]
    fn test_radius_change_diffs() {
        let mut tracker = VisibilityTracker::new();
        tracker.update_viewer(A, ChunkKey::new(0, 0), 1);
        let diff = tracker.update_viewer(A, ChunkKey::new(0, 0), 2);
        assert_eq!(diff.entered.len(), 13 - 5);
        assert!(diff.left.is_empty());

        let diff = tracker.update_viewer(A, ChunkKey::new(0, 0), 0);
        assert_eq!(diff.left.len(), 12);
        assert!(diff.entered.is_empty());
    }

    #[test]
    fn test_union_of_viewers() {
        let mut tracker = VisibilityTracker::new();
        let shared = ChunkKey::new(0, 0);

        tracker.update_viewer(A, ChunkKey::new(0, 0), 1);
        tracker.update_viewer(B, ChunkKey::new(1, 0), 1);
        assert!(tracker.is_referenced(shared));

        let diff = tracker.update_viewer(A, ChunkKey::new(100, 0), 1);
        assert!(diff.left.contains(&shared));
        // B still sees it
        assert!(tracker.is_referenced(shared));

        tracker.update_viewer(B, ChunkKey::new(-100, 0), 1);
        assert!(!tracker.is_referenced(shared));
    }

    #[test]
    fn test_remove_viewer() {
        let mut tracker = VisibilityTracker::new();
        tracker.update_viewer(A, ChunkKey::new(0, 0), 1);

        let left = tracker.remove_viewer(A);
        assert_eq!(left.len(), 5);
        assert_eq!(tracker.referenced_count(), 0);
        assert_eq!(tracker.viewer_count(), 0);
        assert!(tracker.remove_viewer(A).is_empty());
    }

    #[test]
    fn test_viewer_count() {
        let mut tracker = VisibilityTracker::new();
        tracker.update_viewer(A, ChunkKey::new(0, 0), 5);
        tracker.update_viewer(B, ChunkKey::new(4, 0), 5);
        tracker.update_viewer(B, ChunkKey::new(5, 0), 5);

        assert_eq!(tracker.viewer_count(), 2);
        assert_eq!(tracker.visible(ViewerId(9)), None);
    }
}

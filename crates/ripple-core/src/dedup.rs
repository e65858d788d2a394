// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Batch deduplication.
//!
//! Ordering invariant:
//! - Entries are processed in ascending depth.
//! - Ties keep their original batch position (stable sort), so the wrapper
//!   sequence of an encoded frame is deterministic.
//!
//! An entry is covered once it, or one of its ancestors, has been selected.
//! Selecting shallower entries first means a covered entry is always
//! discovered before it could be emitted on its own.

use ripple_proto::ComponentId;
use rustc_hash::FxHashMap;

use crate::tree::{depth, ComponentTree};

/// Batch entry annotated with its depth and original position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentIdAndDepth {
    /// Component id from the batch.
    pub id: ComponentId,
    /// Distance from the root (root = 0).
    pub depth: usize,
    /// Index in the original batch.
    pub position: usize,
}

/// Fills `buf` with the batch sorted by depth, original order among ties.
///
/// `buf` is cleared first and reused across batches.
pub fn sort_by_depth<T: ComponentTree + ?Sized>(
    tree: &T,
    batch: &[ComponentId],
    buf: &mut Vec<ComponentIdAndDepth>,
) {
    buf.clear();
    buf.reserve(batch.len());
    buf.extend(
        batch
            .iter()
            .enumerate()
            .map(|(position, &id)| ComponentIdAndDepth {
                id,
                depth: depth(tree, id),
                position,
            }),
    );
    // `sort_by_key` is stable; position breaks ties implicitly.
    buf.sort_by_key(|entry| entry.depth);
}

/// Minimal covering subset of `batch`.
///
/// Every id of `batch` is either in the result or a strict descendant of a
/// result id; no result id descends from another; duplicates collapse. The
/// result is depth-ascending with original order among equal depths.
///
/// This is the tree-only form of the cover check. The streaming encoder
/// performs the same selection while serializing, marking descendants as it
/// renders them.
pub fn dedupe<T: ComponentTree + ?Sized>(tree: &T, batch: &[ComponentId]) -> Vec<ComponentId> {
    let mut sorted = Vec::new();
    sort_by_depth(tree, batch, &mut sorted);

    let mut selected = VisitedSet::new();
    let mut out = Vec::new();
    for entry in &sorted {
        if covered(tree, &selected, entry.id) {
            continue;
        }
        selected.mark(entry.id);
        out.push(entry.id);
    }
    out
}

fn covered<T: ComponentTree + ?Sized>(tree: &T, selected: &VisitedSet, id: ComponentId) -> bool {
    if selected.contains(id) {
        return true;
    }
    let mut current = id;
    while let Some(parent) = tree.parent_of(current) {
        if selected.contains(parent) {
            return true;
        }
        current = parent;
    }
    false
}

/// Generation-stamped set of component ids.
///
/// `reset` is O(1): it bumps the generation instead of clearing the map, so
/// the allocation is reused across batches.
#[derive(Debug, Clone)]
pub struct VisitedSet {
    gen: u32,
    seen: FxHashMap<ComponentId, u32>,
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl VisitedSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            gen: 1,
            seen: FxHashMap::default(),
        }
    }

    /// Forgets every id marked so far.
    pub fn reset(&mut self) {
        self.gen = self.gen.wrapping_add(1);
        if self.gen == 0 {
            // Wrapped: stale stamps could alias the new generation.
            self.seen.clear();
            self.gen = 1;
        }
    }

    /// True if `id` was marked since the last reset.
    #[inline]
    pub fn contains(&self, id: ComponentId) -> bool {
        matches!(self.seen.get(&id), Some(&g) if g == self.gen)
    }

    /// Marks `id`; returns `false` if it was already marked.
    #[inline]
    pub fn mark(&mut self, id: ComponentId) -> bool {
        self.seen.insert(id, self.gen) != Some(self.gen)
    }
}

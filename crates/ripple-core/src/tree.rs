// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Component ownership tree and depth resolution.
//!
//! Components are addressed by stable [`ComponentId`]s and link to their
//! parent by id (arena + index), so the tree never holds pointer cycles.

use ripple_proto::{ComponentId, MarkerKind};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Read-only view of component ownership.
pub trait ComponentTree {
    /// Parent of `id`, or `None` for a root (or an unknown id).
    fn parent_of(&self, id: ComponentId) -> Option<ComponentId>;
}

/// Number of ownership edges between `id` and its root.
///
/// Precondition: the tree is acyclic. [`RenderTree`] guarantees this by
/// construction; other [`ComponentTree`] implementations must too, or this
/// loops forever.
pub fn depth<T: ComponentTree + ?Sized>(tree: &T, id: ComponentId) -> usize {
    let mut depth = 0;
    let mut current = id;
    while let Some(parent) = tree.parent_of(current) {
        depth += 1;
        current = parent;
    }
    depth
}

/// True when `ancestor` is a strict ancestor of `id`.
pub fn is_descendant<T: ComponentTree + ?Sized>(
    tree: &T,
    id: ComponentId,
    ancestor: ComponentId,
) -> bool {
    let mut current = id;
    while let Some(parent) = tree.parent_of(current) {
        if parent == ancestor {
            return true;
        }
        current = parent;
    }
    false
}

/// Interactive hosting information for a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    /// Hosting mode written into the begin marker.
    pub kind: MarkerKind,
    /// Optional author-supplied key.
    pub key: Option<String>,
}

/// Per-component record.
#[derive(Debug, Clone, Default)]
pub struct ComponentState {
    parent: Option<ComponentId>,
    children: Vec<ComponentId>,
    boundary: Option<Boundary>,
}

impl ComponentState {
    /// Owning component, if any.
    pub fn parent(&self) -> Option<ComponentId> {
        self.parent
    }

    /// Child components in attachment order.
    pub fn children(&self) -> &[ComponentId] {
        &self.children
    }

    /// Interactive boundary this component hosts, if any.
    pub fn boundary(&self) -> Option<&Boundary> {
        self.boundary.as_ref()
    }
}

/// Structural errors raised while building a [`RenderTree`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// The id is already attached somewhere in the tree.
    #[error("component already exists: {0}")]
    Duplicate(ComponentId),
    /// The requested parent does not exist.
    #[error("missing parent component: {0}")]
    MissingParent(ComponentId),
    /// The id is not in the tree.
    #[error("missing component: {0}")]
    Missing(ComponentId),
}

/// Arena of component states keyed by id.
///
/// Children can only be attached to an existing parent and ids cannot be
/// re-inserted while present, so every chain of parent links ends at a root.
#[derive(Debug, Clone, Default)]
pub struct RenderTree {
    states: FxHashMap<ComponentId, ComponentState>,
}

impl RenderTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a parentless component.
    pub fn insert_root(&mut self, id: ComponentId) -> Result<(), TreeError> {
        if self.states.contains_key(&id) {
            return Err(TreeError::Duplicate(id));
        }
        self.states.insert(id, ComponentState::default());
        Ok(())
    }

    /// Attaches `id` as the last child of `parent`.
    pub fn insert_child(&mut self, id: ComponentId, parent: ComponentId) -> Result<(), TreeError> {
        if self.states.contains_key(&id) {
            return Err(TreeError::Duplicate(id));
        }
        let Some(parent_state) = self.states.get_mut(&parent) else {
            return Err(TreeError::MissingParent(parent));
        };
        parent_state.children.push(id);
        self.states.insert(
            id,
            ComponentState {
                parent: Some(parent),
                ..ComponentState::default()
            },
        );
        Ok(())
    }

    /// Marks `id` as hosting an interactive boundary (or clears it).
    pub fn set_boundary(
        &mut self,
        id: ComponentId,
        boundary: Option<Boundary>,
    ) -> Result<(), TreeError> {
        let state = self.states.get_mut(&id).ok_or(TreeError::Missing(id))?;
        state.boundary = boundary;
        Ok(())
    }

    /// Removes `id` and its whole subtree; returns the removed ids.
    pub fn remove(&mut self, id: ComponentId) -> Result<Vec<ComponentId>, TreeError> {
        let state = self.states.get(&id).ok_or(TreeError::Missing(id))?;
        if let Some(parent) = state.parent {
            if let Some(parent_state) = self.states.get_mut(&parent) {
                parent_state.children.retain(|c| *c != id);
            }
        }
        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(state) = self.states.remove(&next) {
                stack.extend(state.children);
                removed.push(next);
            }
        }
        Ok(removed)
    }

    /// State of `id`, if present.
    pub fn state(&self, id: ComponentId) -> Option<&ComponentState> {
        self.states.get(&id)
    }

    /// Children of `id` (empty for unknown ids).
    pub fn children(&self, id: ComponentId) -> &[ComponentId] {
        self.states
            .get(&id)
            .map_or(&[], |state| state.children.as_slice())
    }

    /// Number of components in the tree.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True when the tree holds no components.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl ComponentTree for RenderTree {
    fn parent_of(&self, id: ComponentId) -> Option<ComponentId> {
        self.states.get(&id).and_then(|state| state.parent)
    }
}

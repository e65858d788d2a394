// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;

use ripple_core::{Boundary, ComponentSource, ComponentTree, MarkupWriter, RenderTree};
use ripple_proto::{ComponentId, MarkerKind};

/// Shorthand for a component id.
pub fn c(id: u64) -> ComponentId {
    ComponentId(id)
}

/// Component engine stand-in: each component renders `<name>`, its
/// children, then `</name>`.
#[derive(Default)]
pub struct Page {
    pub tree: RenderTree,
    names: HashMap<ComponentId, String>,
}

impl Page {
    pub fn root(mut self, id: u64, name: &str) -> Self {
        self.tree.insert_root(c(id)).expect("insert root");
        self.names.insert(c(id), name.to_owned());
        self
    }

    pub fn child(mut self, id: u64, parent: u64, name: &str) -> Self {
        self.tree.insert_child(c(id), c(parent)).expect("insert child");
        self.names.insert(c(id), name.to_owned());
        self
    }

    pub fn boundary(mut self, id: u64, kind: MarkerKind) -> Self {
        self.tree
            .set_boundary(c(id), Some(Boundary { kind, key: None }))
            .expect("set boundary");
        self
    }

    /// R(0) ─ A(1) ─ B(2)
    ///      └ C(3)
    pub fn abc() -> Self {
        Self::default()
            .root(0, "main")
            .child(1, 0, "section")
            .child(2, 1, "p")
            .child(3, 0, "aside")
    }
}

impl ComponentTree for Page {
    fn parent_of(&self, id: ComponentId) -> Option<ComponentId> {
        self.tree.parent_of(id)
    }
}

impl ComponentSource for Page {
    fn boundary_of(&self, id: ComponentId) -> Option<Boundary> {
        self.tree.state(id).and_then(|s| s.boundary().cloned())
    }

    fn render_component(&self, id: ComponentId, out: &mut MarkupWriter<'_>) {
        let name = self.names.get(&id).map_or("div", String::as_str);
        out.markup(&format!("<{name}>"));
        for &child in self.tree.children(id) {
            out.child(child);
        }
        out.markup(&format!("</{name}>"));
    }
}

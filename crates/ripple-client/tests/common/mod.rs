// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Mutex;

use ripple_core::{Boundary, ComponentSource, ComponentTree, MarkupWriter, RenderTree};
use ripple_proto::{ComponentId, MarkerKind};

pub const ROOT: ComponentId = ComponentId(0);
pub const TABLE: ComponentId = ComponentId(1);
pub const COUNTER: ComponentId = ComponentId(2);
pub const BUTTON: ComponentId = ComponentId(3);

/// Report page: a large static body, a data table that starts out loading,
/// and an interactive counter hosting a client-rendered button.
pub struct ReportPage {
    tree: RenderTree,
    paragraphs: usize,
    rows: Mutex<Option<Vec<String>>>,
}

impl ReportPage {
    pub fn new(paragraphs: usize) -> Self {
        let mut tree = RenderTree::new();
        tree.insert_root(ROOT).expect("root");
        tree.insert_child(TABLE, ROOT).expect("table");
        tree.insert_child(COUNTER, ROOT).expect("counter");
        tree.insert_child(BUTTON, COUNTER).expect("button");
        tree.set_boundary(
            COUNTER,
            Some(Boundary {
                kind: MarkerKind::Server,
                key: Some("counter".into()),
            }),
        )
        .expect("boundary");
        tree.set_boundary(
            BUTTON,
            Some(Boundary {
                kind: MarkerKind::WebAssembly,
                key: None,
            }),
        )
        .expect("boundary");
        Self {
            tree,
            paragraphs,
            rows: Mutex::new(None),
        }
    }

    pub fn resolve(&self, rows: Vec<String>) {
        *self.rows.lock().expect("rows lock") = Some(rows);
    }

    pub fn paragraph(i: usize) -> String {
        format!("Paragraph {i}: streaming keeps the page responsive while data loads.")
    }
}

impl ComponentTree for ReportPage {
    fn parent_of(&self, id: ComponentId) -> Option<ComponentId> {
        self.tree.parent_of(id)
    }
}

impl ComponentSource for ReportPage {
    fn boundary_of(&self, id: ComponentId) -> Option<Boundary> {
        self.tree.state(id).and_then(|s| s.boundary().cloned())
    }

    fn render_component(&self, id: ComponentId, out: &mut MarkupWriter<'_>) {
        match id {
            ROOT => {
                out.markup("<html><body><h1 id=\"title\">Report</h1><div id=\"static\">");
                for i in 0..self.paragraphs {
                    out.markup("<p>");
                    out.text(&Self::paragraph(i));
                    out.markup("</p>");
                }
                out.markup("</div>");
                out.child(TABLE);
                out.child(COUNTER);
                out.markup("</body></html>");
            }
            TABLE => match &*self.rows.lock().expect("rows lock") {
                None => out.markup("<p id=\"loading\">Loading...</p>"),
                Some(rows) => {
                    out.markup("<table id=\"data\">");
                    for row in rows {
                        out.markup("<tr><td>");
                        out.text(row);
                        out.markup("</td></tr>");
                    }
                    out.markup("</table>");
                }
            },
            COUNTER => {
                out.markup("<section><input id=\"count\" value=\"0\">");
                out.child(BUTTON);
                out.markup("</section>");
            }
            BUTTON => out.markup("<button>+1</button>"),
            _ => {}
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Sample component engine: a report page whose table resolves late.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use anyhow::anyhow;
use ripple_core::{
    Boundary, Completion, ComponentSource, ComponentTree, MarkupWriter, RenderTree, StreamEvent,
    TreeError,
};
use ripple_proto::{ComponentId, MarkerKind};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Root component: html shell and static content.
pub const ROOT: ComponentId = ComponentId(1);
/// Data table, loading until the engine resolves it.
pub const TABLE: ComponentId = ComponentId(2);
/// Interactive counter hosted as a server boundary.
pub const COUNTER: ComponentId = ComponentId(3);

const PARAGRAPHS: usize = 40;

/// How the engine ends the response after the table update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Normal completion.
    #[default]
    Complete,
    /// Navigate elsewhere after the update.
    Redirect,
    /// Fail after the update.
    Fail,
}

/// Per-request demo engine.
pub struct DemoEngine {
    tree: RenderTree,
    rows: RwLock<Option<Vec<(String, u32)>>>,
}

impl DemoEngine {
    /// Builds the page tree with the table still loading.
    pub fn new() -> Result<Self, TreeError> {
        let mut tree = RenderTree::new();
        tree.insert_root(ROOT)?;
        tree.insert_child(TABLE, ROOT)?;
        tree.insert_child(COUNTER, ROOT)?;
        tree.set_boundary(
            COUNTER,
            Some(Boundary {
                kind: MarkerKind::Server,
                key: Some("counter".into()),
            }),
        )?;
        Ok(Self {
            tree,
            rows: RwLock::new(None),
        })
    }

    /// Resolves the table after `delay`, reports it as a render batch and
    /// then ends the response according to `outcome`.
    ///
    /// A closed channel means the response is gone; the engine just stops.
    pub async fn drive(&self, events: mpsc::Sender<StreamEvent>, delay: Duration, outcome: Outcome) {
        tokio::time::sleep(delay).await;
        self.resolve(vec![
            ("north".into(), 1280),
            ("south & east".into(), 947),
            ("west".into(), 311),
        ]);
        debug!("table resolved");
        if events.send(StreamEvent::Batch(vec![TABLE])).await.is_err() {
            return;
        }
        let completion = match outcome {
            Outcome::Complete => Completion::Completed,
            Outcome::Redirect => Completion::Redirect("/?outcome=complete".into()),
            Outcome::Fail => Completion::Failed(anyhow!("inventory backend unavailable")),
        };
        // Ignored: the receiver only disappears with the response.
        let _ = events.send(StreamEvent::Finished(completion)).await;
    }

    /// Replaces the table rows.
    pub fn resolve(&self, rows: Vec<(String, u32)>) {
        *self.rows.write().unwrap_or_else(PoisonError::into_inner) = Some(rows);
    }

    fn render_root(out: &mut MarkupWriter<'_>) {
        out.markup("<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Ripple report</title></head><body>");
        out.markup("<h1 id=\"title\">Regional report</h1><div id=\"static\">");
        for i in 0..PARAGRAPHS {
            out.markup("<p>");
            out.text(&format!("Section {i}: figures below stream in once the backend answers."));
            out.markup("</p>");
        }
        out.markup("</div>");
        out.child(TABLE);
        out.child(COUNTER);
        out.markup("</body></html>");
    }

    fn render_table(&self, out: &mut MarkupWriter<'_>) {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let Some(rows) = rows.as_ref() else {
            out.markup("<p id=\"loading\">Loading...</p>");
            return;
        };
        out.markup("<table id=\"data\"><tr><th>Region</th><th>Units</th></tr>");
        for (region, units) in rows {
            out.markup("<tr><td>");
            out.text(region);
            out.markup("</td><td>");
            out.text(&units.to_string());
            out.markup("</td></tr>");
        }
        out.markup("</table>");
    }
}

impl ComponentTree for DemoEngine {
    fn parent_of(&self, id: ComponentId) -> Option<ComponentId> {
        self.tree.parent_of(id)
    }
}

impl ComponentSource for DemoEngine {
    fn boundary_of(&self, id: ComponentId) -> Option<Boundary> {
        self.tree.state(id).and_then(|s| s.boundary().cloned())
    }

    fn render_component(&self, id: ComponentId, out: &mut MarkupWriter<'_>) {
        match id {
            ROOT => Self::render_root(out),
            TABLE => self.render_table(out),
            COUNTER => out.markup("<section><input id=\"count\" value=\"0\"><button>+1</button></section>"),
            _ => {}
        }
    }
}

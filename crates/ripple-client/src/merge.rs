// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Region-scoped DOM merging.
//!
//! A content update names a component and carries its freshly rendered
//! markup. The merger finds the component's region (the siblings between
//! `<!--c:ID-->` and `<!--/c:ID-->`) and synchronizes only that range:
//!
//! 1. parse the payload into detached nodes;
//! 2. compute the longest common subsequence of old and new siblings under
//!    [`compatible`];
//! 3. remove unmatched old nodes, update matched ones in place (recursing
//!    into children), insert unmatched new nodes at their positions.
//!
//! Matched nodes keep their [`NodeKey`], so live state such as an input's
//! typed value survives unless the markup changed that value.

use ripple_proto::wire::RegionComment;
use ripple_proto::{ComponentId, ComponentUpdate, TerminalFrame};
use thiserror::Error;
use tracing::{debug, debug_span, info, warn};

use crate::dom::{Document, DomError, Element, NodeData, NodeKey};
use crate::html::{parse_fragment, TreeBuilder};
use crate::stream::StreamObserver;

/// Per-entry merge failures. None of them abort the rest of an update.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// No `<!--c:ID-->` comment exists in the document.
    #[error("component {0} has no region in the document")]
    MissingRegion(ComponentId),
    /// The start comment has no matching end comment among its siblings.
    #[error("component {0} region is not closed among its siblings")]
    UnclosedRegion(ComponentId),
    /// Structural mutation failed.
    #[error("component {id}: {source}")]
    Dom {
        /// Component being merged.
        id: ComponentId,
        /// Underlying failure.
        source: DomError,
    },
}

/// Tally of one [`DomMerger::apply_update`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Components whose region was synchronized.
    pub applied: Vec<ComponentId>,
    /// Entries that could not be merged.
    pub errors: Vec<MergeError>,
    /// Nodes kept in place (identity preserved).
    pub kept: usize,
    /// Nodes inserted from the payload.
    pub inserted: usize,
    /// Old nodes removed.
    pub removed: usize,
}

/// Whether an old node may be updated in place to become `new`.
///
/// Elements need the same tag and `key` attribute, text is always
/// compatible with text, comments and doctypes only with identical ones.
pub fn compatible(doc: &Document, old: NodeKey, new: NodeKey) -> bool {
    match (doc.data(old), doc.data(new)) {
        (Some(NodeData::Element(a)), Some(NodeData::Element(b))) => {
            a.tag() == b.tag() && a.key() == b.key()
        }
        (Some(NodeData::Text(_)), Some(NodeData::Text(_))) => true,
        (Some(NodeData::Comment(a)), Some(NodeData::Comment(b))) => a == b,
        (Some(NodeData::Doctype(a)), Some(NodeData::Doctype(b))) => a == b,
        _ => false,
    }
}

/// Applies streamed content to a live [`Document`].
#[derive(Debug)]
pub struct DomMerger {
    doc: Document,
    builder: TreeBuilder,
    pending_navigation: Option<String>,
    failure: Option<String>,
    last_report: MergeReport,
}

impl Default for DomMerger {
    fn default() -> Self {
        Self::new(Document::new())
    }
}

impl DomMerger {
    /// Merger over an existing document. Streamed document text is appended
    /// to its root.
    pub fn new(doc: Document) -> Self {
        let builder = TreeBuilder::new(doc.root());
        Self {
            doc,
            builder,
            pending_navigation: None,
            failure: None,
            last_report: MergeReport::default(),
        }
    }

    /// The live document.
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Mutable access, for simulating user interaction.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    /// Consumes the merger.
    pub fn into_document(self) -> Document {
        self.doc
    }

    /// Redirection target received mid-stream, if any.
    pub fn pending_navigation(&self) -> Option<&str> {
        self.pending_navigation.as_deref()
    }

    /// Error message received mid-stream, if any.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// True once a terminal frame arrived; later updates are ignored.
    pub fn is_terminated(&self) -> bool {
        self.pending_navigation.is_some() || self.failure.is_some()
    }

    /// Report of the most recent update applied through the observer.
    pub fn last_report(&self) -> &MergeReport {
        &self.last_report
    }

    /// Appends a piece of the synchronously rendered page.
    pub fn append_document(&mut self, text: &str) {
        self.builder.feed(&mut self.doc, text);
    }

    /// Flushes any held-back page text and closes open elements.
    pub fn finish_document(&mut self) {
        self.builder.finish(&mut self.doc);
    }

    /// Merges every entry of a content update, in order.
    pub fn apply_update(&mut self, updates: &[ComponentUpdate]) -> MergeReport {
        let mut report = MergeReport::default();
        for update in updates {
            let span = debug_span!("merge", component = %update.id);
            let _enter = span.enter();
            match self.apply_one(update, &mut report) {
                Ok(()) => report.applied.push(update.id),
                Err(err) => {
                    warn!(%err, "content update entry skipped");
                    report.errors.push(err);
                }
            }
        }
        debug!(
            applied = report.applied.len(),
            kept = report.kept,
            inserted = report.inserted,
            removed = report.removed,
            "content update merged"
        );
        report
    }

    fn apply_one(
        &mut self,
        update: &ComponentUpdate,
        report: &mut MergeReport,
    ) -> Result<(), MergeError> {
        let id = update.id;
        let (parent, start, end) = self.find_region(id)?;
        let siblings = self.doc.children(parent);
        let (Some(start_index), Some(end_index)) = (
            siblings.iter().position(|&k| k == start),
            siblings.iter().position(|&k| k == end),
        ) else {
            return Err(MergeError::UnclosedRegion(id));
        };
        let old = siblings[start_index + 1..end_index].to_vec();
        let new = parse_fragment(&mut self.doc, &update.markup);
        self.sync_range(parent, start_index + 1, &old, &new, report)
            .map_err(|source| MergeError::Dom { id, source })
    }

    /// Locates the start and end comments of `id`'s region.
    fn find_region(&self, id: ComponentId) -> Result<(NodeKey, NodeKey, NodeKey), MergeError> {
        let start = self
            .doc
            .descendants(self.doc.root())
            .into_iter()
            .find(|&k| self.region_comment(k) == Some(RegionComment::Start(id)))
            .ok_or(MergeError::MissingRegion(id))?;
        let parent = self.doc.parent(start).ok_or(MergeError::UnclosedRegion(id))?;
        let end = self
            .doc
            .children(parent)
            .iter()
            .skip_while(|&&k| k != start)
            .find(|&&k| self.region_comment(k) == Some(RegionComment::End(id)))
            .copied()
            .ok_or(MergeError::UnclosedRegion(id))?;
        Ok((parent, start, end))
    }

    fn region_comment(&self, key: NodeKey) -> Option<RegionComment> {
        match self.doc.data(key)? {
            NodeData::Comment(data) => RegionComment::parse(data),
            _ => None,
        }
    }

    /// Makes `parent`'s children from `offset` (currently `old`) equal to
    /// `new`. `new` nodes are detached; unmatched ones are moved in, matched
    /// ones are freed after their content is copied.
    fn sync_range(
        &mut self,
        parent: NodeKey,
        offset: usize,
        old: &[NodeKey],
        new: &[NodeKey],
        report: &mut MergeReport,
    ) -> Result<(), DomError> {
        let pairs = lcs(&self.doc, old, new);

        let mut matched_old = vec![false; old.len()];
        let mut partner: Vec<Option<NodeKey>> = vec![None; new.len()];
        for &(i, j) in &pairs {
            matched_old[i] = true;
            partner[j] = Some(old[i]);
        }

        for (i, &node) in old.iter().enumerate() {
            if !matched_old[i] {
                self.doc.remove(node)?;
                report.removed += 1;
            }
        }

        for (k, (&fresh, kept)) in new.iter().zip(&partner).enumerate() {
            match kept {
                Some(existing) => {
                    self.sync_node(*existing, fresh, report)?;
                    self.doc.remove(fresh)?;
                    report.kept += 1;
                }
                None => {
                    self.doc.insert(parent, offset + k, fresh)?;
                    report.inserted += 1;
                }
            }
        }
        Ok(())
    }

    /// Updates compatible node `old` in place to match `new`.
    fn sync_node(
        &mut self,
        old: NodeKey,
        new: NodeKey,
        report: &mut MergeReport,
    ) -> Result<(), DomError> {
        let Some(new_data) = self.doc.data(new).cloned() else {
            return Err(DomError::Missing(new));
        };
        match new_data {
            NodeData::Text(text) => {
                if let Some(NodeData::Text(existing)) = self.doc.data_mut(old) {
                    if *existing != text {
                        *existing = text;
                    }
                }
                Ok(())
            }
            NodeData::Element(fresh) => {
                let existing = self.doc.element_mut(old).ok_or(DomError::Missing(old))?;
                sync_attributes(existing, &fresh);
                let old_children = self.doc.children(old).to_vec();
                let new_children = self.doc.children(new).to_vec();
                for &child in &new_children {
                    self.doc.detach(child)?;
                }
                self.sync_range(old, 0, &old_children, &new_children, report)
            }
            // Comments and doctypes only match identical nodes.
            NodeData::Comment(_) | NodeData::Doctype(_) | NodeData::Document => Ok(()),
        }
    }
}

/// Copies `fresh`'s attributes onto `existing`. The live `value` property
/// follows the markup only when the `value` attribute itself changed.
fn sync_attributes(existing: &mut Element, fresh: &Element) {
    let value_changed = existing.attribute("value") != fresh.attribute("value");
    let stale: Vec<String> = existing
        .attributes()
        .filter(|(name, _)| fresh.attribute(name).is_none())
        .map(|(name, _)| name.to_owned())
        .collect();
    for name in &stale {
        existing.remove_attribute(name);
    }
    for (name, value) in fresh.attributes() {
        if existing.attribute(name) != Some(value) {
            existing.set_attribute(name, value);
        }
    }
    if value_changed {
        match fresh.attribute("value") {
            Some(value) => existing.set_property("value", value),
            None => {
                existing.remove_property("value");
            }
        }
    }
}

/// Matched `(old_index, new_index)` pairs of a longest common subsequence
/// under [`compatible`], ascending in both indices.
fn lcs(doc: &Document, old: &[NodeKey], new: &[NodeKey]) -> Vec<(usize, usize)> {
    let (rows, cols) = (old.len(), new.len());
    // table[i][j] = LCS length of old[i..] and new[j..]
    let mut table = vec![0u32; (rows + 1) * (cols + 1)];
    let at = |i: usize, j: usize| i * (cols + 1) + j;
    for i in (0..rows).rev() {
        for j in (0..cols).rev() {
            table[at(i, j)] = if compatible(doc, old[i], new[j]) {
                table[at(i + 1, j + 1)] + 1
            } else {
                table[at(i + 1, j)].max(table[at(i, j + 1)])
            };
        }
    }

    let mut pairs = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < rows && j < cols {
        if compatible(doc, old[i], new[j]) && table[at(i, j)] == table[at(i + 1, j + 1)] + 1 {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[at(i + 1, j)] >= table[at(i, j + 1)] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

impl StreamObserver for DomMerger {
    fn on_document(&mut self, text: &str) {
        self.append_document(text);
    }

    fn on_content_update(&mut self, updates: &[ComponentUpdate]) {
        if self.is_terminated() {
            debug!(entries = updates.len(), "ignoring content update after terminal frame");
            return;
        }
        self.last_report = self.apply_update(updates);
    }

    fn on_terminal(&mut self, frame: &TerminalFrame) {
        if self.is_terminated() {
            return;
        }
        match frame {
            TerminalFrame::Redirection(url) => {
                info!(%url, "server requested navigation");
                self.pending_navigation = Some(url.clone());
            }
            TerminalFrame::Error(message) => {
                warn!(%message, "server reported a render failure");
                self.failure = Some(message.clone());
            }
        }
    }

    fn on_finished(&mut self) {
        self.finish_document();
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::html::parse_document;

    fn update(id: u64, markup: &str) -> ComponentUpdate {
        ComponentUpdate {
            id: ComponentId(id),
            markup: markup.to_owned(),
        }
    }

    fn merger(markup: &str) -> DomMerger {
        DomMerger::new(parse_document(markup))
    }

    fn html(merger: &DomMerger) -> String {
        merger.document().inner_html(merger.document().root())
    }

    #[test]
    fn replaces_only_the_region() {
        let mut m = merger(
            "<h1>title</h1><!--c:7--><p>loading</p><!--/c:7--><footer>f</footer>",
        );
        let footer = m.document().children(m.document().root())[4];

        let report = m.apply_update(&[update(7, "<table><tr><td>1</td></tr></table>")]);

        assert_eq!(report.applied, vec![ComponentId(7)]);
        assert_eq!(
            html(&m),
            "<h1>title</h1><!--c:7--><table><tr><td>1</td></tr></table><!--/c:7--><footer>f</footer>"
        );
        assert!(m.document().contains(footer));
        assert_eq!(m.document().children(m.document().root())[4], footer);
    }

    #[test]
    fn compatible_nodes_keep_identity_and_live_value() {
        let mut m = merger(
            "<!--c:1--><form><input id=name value=a><span>old</span></form><!--/c:1-->",
        );
        let input = m.document().element_by_id("name").unwrap();
        m.document_mut()
            .element_mut(input)
            .unwrap()
            .set_property("value", "typed by user");

        let report = m.apply_update(&[update(
            1,
            "<form><input id=name value=a><span>new</span><em>!</em></form>",
        )]);

        assert!(report.errors.is_empty());
        let doc = m.document();
        assert_eq!(doc.element_by_id("name"), Some(input));
        assert_eq!(doc.element(input).unwrap().value(), Some("typed by user"));
        assert_eq!(doc.text_content(doc.root()), "new!");
    }

    #[test]
    fn changed_value_attribute_refreshes_the_property() {
        let mut m = merger("<!--c:1--><input id=q value=a><!--/c:1-->");
        let input = m.document().element_by_id("q").unwrap();
        m.document_mut()
            .element_mut(input)
            .unwrap()
            .set_property("value", "typed");

        m.apply_update(&[update(1, "<input id=q value=b>")]);

        let element = m.document().element(input).unwrap();
        assert_eq!(element.attribute("value"), Some("b"));
        assert_eq!(element.value(), Some("b"));
    }

    #[test]
    fn keyed_rows_are_reordered_by_insert_and_remove() {
        let mut m = merger(
            "<!--c:2--><ul><li key=a>A</li><li key=b>B</li><li key=c>C</li></ul><!--/c:2-->",
        );
        let ul = m.document().children(m.document().root())[1];
        let b = m.document().children(ul)[1];

        let report = m.apply_update(&[update(2, "<ul><li key=b>B</li><li key=d>D</li></ul>")]);

        let doc = m.document();
        assert_eq!(doc.children(ul)[0], b);
        assert_eq!(
            doc.inner_html(ul),
            "<li key=\"b\">B</li><li key=\"d\">D</li>"
        );
        assert_eq!(report.removed, 2);
        assert_eq!(report.inserted, 1);
    }

    #[test]
    fn nested_region_updates_leave_the_parent_alone() {
        let mut m = merger(
            "<!--c:0--><main><!--c:1--><p>a</p><!--/c:1--><!--c:2--><p>b</p><!--/c:2--></main><!--/c:0-->",
        );
        m.apply_update(&[update(2, "<p>B</p>")]);
        assert_eq!(
            html(&m),
            "<!--c:0--><main><!--c:1--><p>a</p><!--/c:1--><!--c:2--><p>B</p><!--/c:2--></main><!--/c:0-->"
        );
    }

    #[test]
    fn missing_regions_are_reported_not_fatal() {
        let mut m = merger("<!--c:1--><p>x</p><!--/c:1--><!--c:3--><p>y</p>");
        let report = m.apply_update(&[
            update(9, "<p>nope</p>"),
            update(3, "<p>z</p>"),
            update(1, "<p>X</p>"),
        ]);
        assert_eq!(
            report.errors,
            vec![
                MergeError::MissingRegion(ComponentId(9)),
                MergeError::UnclosedRegion(ComponentId(3)),
            ]
        );
        assert_eq!(report.applied, vec![ComponentId(1)]);
        assert!(html(&m).starts_with("<!--c:1--><p>X</p><!--/c:1-->"));
    }

    #[test]
    fn terminal_frames_stop_later_updates() {
        let mut m = merger("<!--c:1--><p>x</p><!--/c:1-->");
        m.on_terminal(&TerminalFrame::Redirection("/login".into()));
        m.on_content_update(&[update(1, "<p>y</p>")]);
        assert_eq!(m.pending_navigation(), Some("/login"));
        assert_eq!(html(&m), "<!--c:1--><p>x</p><!--/c:1-->");
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-response streaming session.
//!
//! A session owns everything that lives for one response: the framing token,
//! the boundary-marker sequence counter, and the scratch state reused by each
//! batch. Batch state is only reachable through a [`BatchScope`], which
//! mutably borrows the session and resets the scratch state on creation, so
//! two batches can never share or leak it.

use ripple_proto::wire::{close_block, close_component, open_block, open_component, write_framing};
use ripple_proto::{ComponentId, FramingToken, StreamFrame};
use tracing::debug;

use crate::dedup::{sort_by_depth, ComponentIdAndDepth, VisitedSet};
use crate::encoder::{enclosing_mode, ComponentSource, MarkupWriter};

/// Encoded output of one render batch.
#[derive(Debug, Clone, Copy)]
pub struct EncodedBatch<'a> {
    /// Bytes to write; empty when nothing survived deduplication.
    pub text: &'a str,
    /// Components that received a wrapper, in emission order.
    pub components: &'a [ComponentId],
}

impl EncodedBatch<'_> {
    /// True when the batch produced no frame.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Streaming state for a single response.
#[derive(Debug)]
pub struct StreamingSession {
    framing: FramingToken,
    next_sequence: u64,
    visited: VisitedSet,
    sorted: Vec<ComponentIdAndDepth>,
    scratch: String,
    emitted: Vec<ComponentId>,
}

/// Exclusive, freshly reset view of a session's batch state.
struct BatchScope<'s> {
    framing: &'s FramingToken,
    next_sequence: &'s mut u64,
    visited: &'s mut VisitedSet,
    sorted: &'s mut Vec<ComponentIdAndDepth>,
    out: &'s mut String,
    emitted: &'s mut Vec<ComponentId>,
}

impl StreamingSession {
    /// Creates a session for a response framed with `framing`.
    pub fn new(framing: FramingToken) -> Self {
        Self {
            framing,
            next_sequence: 0,
            visited: VisitedSet::new(),
            sorted: Vec::new(),
            scratch: String::new(),
            emitted: Vec::new(),
        }
    }

    /// Correlation token used for every frame of this response.
    pub fn framing(&self) -> &FramingToken {
        &self.framing
    }

    fn scope(&mut self) -> BatchScope<'_> {
        self.visited.reset();
        self.sorted.clear();
        self.scratch.clear();
        self.emitted.clear();
        BatchScope {
            framing: &self.framing,
            next_sequence: &mut self.next_sequence,
            visited: &mut self.visited,
            sorted: &mut self.sorted,
            out: &mut self.scratch,
            emitted: &mut self.emitted,
        }
    }

    /// Framing opener written before the synchronous page.
    pub fn opener(&mut self) -> &str {
        let scope = self.scope();
        write_framing(scope.out, scope.framing);
        &self.scratch
    }

    /// Renders the synchronous page rooted at `root`.
    ///
    /// Every component, the root included, is bracketed by region comments;
    /// boundary markers are written wherever the render mode changes.
    pub fn render_document<S: ComponentSource>(&mut self, source: &S, root: ComponentId) -> &str {
        let scope = self.scope();
        let mut writer = MarkupWriter::new(source, scope.out, scope.visited, scope.next_sequence, None);
        writer.child(root);
        debug!(root = %root, bytes = self.scratch.len(), "rendered document");
        &self.scratch
    }

    /// Encodes one render batch as a content-update frame.
    ///
    /// Entries are visited in depth order; an entry already marked by an
    /// earlier entry's subtree (or a duplicate) is skipped. Boundary markers
    /// are suppressed for each wrapper's outermost component, whose identity
    /// the wrapper carries.
    pub fn encode_batch<S: ComponentSource>(
        &mut self,
        source: &S,
        batch: &[ComponentId],
    ) -> EncodedBatch<'_> {
        let scope = self.scope();
        sort_by_depth(source, batch, scope.sorted);

        for entry in &*scope.sorted {
            if !scope.visited.mark(entry.id) {
                continue;
            }
            if scope.emitted.is_empty() {
                open_block(scope.out);
            }
            open_component(scope.out, entry.id);
            let mode = enclosing_mode(source, entry.id);
            let mut writer = MarkupWriter::new(
                source,
                &mut *scope.out,
                &mut *scope.visited,
                &mut *scope.next_sequence,
                mode,
            );
            source.render_component(entry.id, &mut writer);
            close_component(scope.out);
            scope.emitted.push(entry.id);
        }
        if !scope.emitted.is_empty() {
            close_block(scope.out, scope.framing);
        }

        debug!(
            batch = batch.len(),
            wrappers = self.emitted.len(),
            bytes = self.scratch.len(),
            "encoded render batch"
        );
        EncodedBatch {
            text: &self.scratch,
            components: &self.emitted,
        }
    }

    /// Encodes an error or redirection frame.
    pub fn encode_terminal(&mut self, frame: &StreamFrame) -> &str {
        let scope = self.scope();
        frame.encode(scope.out, scope.framing);
        &self.scratch
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::tree::{Boundary, ComponentTree, RenderTree};
    use ripple_proto::wire::parse_block;
    use ripple_proto::{MarkerKind, StreamFrame};
    use std::collections::HashMap;

    fn c(id: u64) -> ComponentId {
        ComponentId(id)
    }

    /// Each component renders `<name>` + its children + `</name>`.
    struct Fixture {
        tree: RenderTree,
        names: HashMap<ComponentId, &'static str>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tree: RenderTree::new(),
                names: HashMap::new(),
            }
        }

        fn root(mut self, id: u64, name: &'static str) -> Self {
            self.tree.insert_root(c(id)).unwrap();
            self.names.insert(c(id), name);
            self
        }

        fn child(mut self, id: u64, parent: u64, name: &'static str) -> Self {
            self.tree.insert_child(c(id), c(parent)).unwrap();
            self.names.insert(c(id), name);
            self
        }

        fn boundary(mut self, id: u64, kind: MarkerKind) -> Self {
            self.tree
                .set_boundary(
                    c(id),
                    Some(Boundary {
                        kind,
                        key: None,
                    }),
                )
                .unwrap();
            self
        }
    }

    impl ComponentTree for Fixture {
        fn parent_of(&self, id: ComponentId) -> Option<ComponentId> {
            self.tree.parent_of(id)
        }
    }

    impl ComponentSource for Fixture {
        fn boundary_of(&self, id: ComponentId) -> Option<Boundary> {
            self.tree.state(id).and_then(|s| s.boundary().cloned())
        }

        fn render_component(&self, id: ComponentId, out: &mut MarkupWriter<'_>) {
            let name = self.names.get(&id).copied().unwrap_or("unknown");
            out.markup(&format!("<{name}>"));
            for &child in self.tree.children(id) {
                out.child(child);
            }
            out.markup(&format!("</{name}>"));
        }
    }

    /// A(1) ─ B(2)
    /// C(3) (separate subtree at depth 1 under R(0))
    fn abc() -> Fixture {
        Fixture::new()
            .root(0, "r")
            .child(1, 0, "a")
            .child(2, 1, "b")
            .child(3, 0, "c")
    }

    fn wrappers(text: &str) -> Vec<(ComponentId, String)> {
        let inner = text
            .strip_prefix("<update-block>")
            .and_then(|s| s.split("<update-block>").next())
            .unwrap();
        match parse_block(inner).unwrap() {
            StreamFrame::ContentUpdate(u) => u.into_iter().map(|u| (u.id, u.markup)).collect(),
            other => panic!("expected content update, got {other:?}"),
        }
    }

    #[test]
    fn empty_batch_writes_zero_bytes() {
        let fx = abc();
        let mut session = StreamingSession::new(FramingToken::new("t"));
        let encoded = session.encode_batch(&fx, &[]);
        assert!(encoded.is_empty());
        assert!(encoded.components.is_empty());
    }

    #[test]
    fn child_markup_appears_only_inside_its_ancestor() {
        let fx = abc();
        let mut session = StreamingSession::new(FramingToken::empty());
        let encoded = session.encode_batch(&fx, &[c(2), c(1), c(3)]);
        assert_eq!(encoded.components, &[c(1), c(3)]);
        let text = encoded.text.to_owned();
        assert_eq!(
            wrappers(&text),
            vec![
                (c(1), "<a><!--c:2--><b></b><!--/c:2--></a>".to_owned()),
                (c(3), "<c></c>".to_owned()),
            ]
        );
        assert_eq!(text.matches("<b>").count(), 1);
    }

    #[test]
    fn repeated_id_yields_one_wrapper() {
        let fx = abc();
        let mut session = StreamingSession::new(FramingToken::empty());
        let encoded = session.encode_batch(&fx, &[c(1), c(1)]);
        assert_eq!(encoded.components, &[c(1)]);
    }

    #[test]
    fn visited_state_does_not_leak_between_batches() {
        let fx = abc();
        let mut session = StreamingSession::new(FramingToken::empty());
        assert_eq!(session.encode_batch(&fx, &[c(1)]).components, &[c(1)]);
        assert_eq!(session.encode_batch(&fx, &[c(2)]).components, &[c(2)]);
        assert_eq!(session.encode_batch(&fx, &[c(1)]).components, &[c(1)]);
    }

    #[test]
    fn frame_ends_with_framing_comment() {
        let fx = abc();
        let mut session = StreamingSession::new(FramingToken::new("beef"));
        let text = session.encode_batch(&fx, &[c(3)]).text.to_owned();
        assert_eq!(
            text,
            "<update-block><template component=\"3\"><c></c></template>\
             <update-block><!--ripple-frame:beef-->"
        );
        assert_eq!(session.opener(), "<!--ripple-frame:beef-->");
    }

    #[test]
    fn outermost_markers_are_suppressed_nested_ones_are_paired() {
        let fx = abc()
            .boundary(1, MarkerKind::Server)
            .boundary(2, MarkerKind::WebAssembly);
        let mut session = StreamingSession::new(FramingToken::empty());

        let text = session.encode_batch(&fx, &[c(1)]).text.to_owned();
        let markup = &wrappers(&text)[0].1;
        assert!(markup.starts_with("<a>"), "no marker for the wrapped component");
        assert_eq!(
            markup,
            "<a><!--ripple:{\"type\":\"webassembly\",\"sequence\":0}--><!--c:2--><b></b>\
             <!--/c:2--><!--/ripple:{\"sequence\":0}--></a>"
        );
    }

    #[test]
    fn same_mode_children_get_no_markers() {
        let fx = abc()
            .boundary(1, MarkerKind::Server)
            .boundary(2, MarkerKind::Server);
        let mut session = StreamingSession::new(FramingToken::empty());
        let text = session.encode_batch(&fx, &[c(1)]).text.to_owned();
        assert!(!text.contains("ripple:"));
    }

    #[test]
    fn document_render_brackets_every_component_and_numbers_markers() {
        let fx = abc()
            .boundary(1, MarkerKind::Server)
            .boundary(3, MarkerKind::Auto);
        let mut session = StreamingSession::new(FramingToken::empty());
        let doc = session.render_document(&fx, c(0)).to_owned();
        assert_eq!(
            doc,
            "<!--c:0--><r>\
             <!--ripple:{\"type\":\"server\",\"sequence\":0}--><!--c:1--><a><!--c:2--><b></b><!--/c:2--></a><!--/c:1--><!--/ripple:{\"sequence\":0}-->\
             <!--ripple:{\"type\":\"auto\",\"sequence\":1}--><!--c:3--><c></c><!--/c:3--><!--/ripple:{\"sequence\":1}-->\
             </r><!--/c:0-->"
        );
        // Sequence numbers keep counting across batches of the same response.
        let fx_update = session.encode_batch(&fx, &[c(0)]).text.to_owned();
        assert!(fx_update.contains("\"sequence\":2"));
    }

    #[test]
    fn terminal_frames_escape_their_text() {
        let mut session = StreamingSession::new(FramingToken::empty());
        let text = session.encode_terminal(&StreamFrame::Error("<oops>".into()));
        assert_eq!(
            text,
            "<update-block><template kind=\"error\">&lt;oops&gt;</template><update-block>"
        );
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Subtree serialization.
//!
//! The component engine writes each component's own markup through a
//! [`MarkupWriter`] and descends into children with [`MarkupWriter::child`].
//! The writer owns everything around a child's markup: the visited mark used
//! for deduplication, the region comments the client merges against, and the
//! interactive-boundary markers.
//!
//! Child layout:
//!
//! ``BEGIN_MARKER? <!--c:ID--> markup <!--/c:ID--> END_MARKER?``
//!
//! Markers sit outside the region so replacing a region's content never
//! drops the component's own markers.

use ripple_proto::escape::escape_into;
use ripple_proto::wire::{write_region_end, write_region_start};
use ripple_proto::{BoundaryMarker, ComponentId, MarkerKind};
use tracing::warn;

use crate::dedup::VisitedSet;
use crate::tree::{Boundary, ComponentTree};

/// The external component engine, as seen by the encoder.
///
/// Implementations must be well-formed: `render_component` writes balanced
/// markup and only calls [`MarkupWriter::child`] for actual children of `id`.
pub trait ComponentSource: ComponentTree {
    /// Interactive boundary hosted by `id`, if any.
    fn boundary_of(&self, id: ComponentId) -> Option<Boundary>;

    /// Writes `id`'s markup, recursing into children via `out.child(..)`.
    fn render_component(&self, id: ComponentId, out: &mut MarkupWriter<'_>);
}

/// Sink handed to [`ComponentSource::render_component`].
pub struct MarkupWriter<'a> {
    source: &'a dyn ComponentSource,
    out: &'a mut String,
    visited: &'a mut VisitedSet,
    next_sequence: &'a mut u64,
    current_mode: Option<MarkerKind>,
}

impl<'a> MarkupWriter<'a> {
    pub(crate) fn new(
        source: &'a dyn ComponentSource,
        out: &'a mut String,
        visited: &'a mut VisitedSet,
        next_sequence: &'a mut u64,
        current_mode: Option<MarkerKind>,
    ) -> Self {
        Self {
            source,
            out,
            visited,
            next_sequence,
            current_mode,
        }
    }

    /// Appends raw, component-authored markup.
    pub fn markup(&mut self, markup: &str) {
        self.out.push_str(markup);
    }

    /// Appends text, escaping HTML-significant characters.
    pub fn text(&mut self, text: &str) {
        escape_into(self.out, text);
    }

    /// Renders child component `id` in place.
    ///
    /// Writes boundary markers when the child hosts a render mode different
    /// from the one currently enclosing it. A child already rendered in this
    /// batch is skipped so no component's markup is emitted twice.
    pub fn child(&mut self, id: ComponentId) {
        if !self.visited.mark(id) {
            warn!(component = %id, "component rendered twice in one batch; skipping");
            return;
        }

        let boundary = self.source.boundary_of(id);
        let markers = boundary
            .as_ref()
            .filter(|b| Some(b.kind) != self.current_mode)
            .and_then(|b| self.marker_comments(b));
        let saved_mode = self.current_mode;
        if let Some(b) = &boundary {
            self.current_mode = Some(b.kind);
        }

        if let Some((begin, _)) = &markers {
            self.out.push_str(begin);
        }
        write_region_start(self.out, id);
        let source = self.source;
        source.render_component(id, self);
        write_region_end(self.out, id);
        if let Some((_, end)) = &markers {
            self.out.push_str(end);
        }

        self.current_mode = saved_mode;
    }

    /// Begin/end comments for a boundary, or neither if the record cannot be
    /// serialized.
    fn marker_comments(&mut self, boundary: &Boundary) -> Option<(String, String)> {
        let marker = BoundaryMarker {
            kind: boundary.kind,
            sequence: *self.next_sequence,
            key: boundary.key.clone(),
        };
        match marker.comments() {
            Ok(pair) => {
                *self.next_sequence += 1;
                Some(pair)
            }
            Err(err) => {
                warn!(?err, sequence = marker.sequence, "dropping boundary markers");
                None
            }
        }
    }
}

/// Render mode enclosing `id`: its own boundary, else the nearest ancestor's.
pub(crate) fn enclosing_mode(source: &dyn ComponentSource, id: ComponentId) -> Option<MarkerKind> {
    let mut current = Some(id);
    while let Some(next) = current {
        if let Some(boundary) = source.boundary_of(next) {
            return Some(boundary.kind);
        }
        current = source.parent_of(next);
    }
    None
}

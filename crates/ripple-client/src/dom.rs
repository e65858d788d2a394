// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Arena DOM.
//!
//! Nodes live in a slot vector addressed by [`NodeKey`]. Freed slots are
//! reused, and each reuse bumps the slot's generation, so a key keeps naming
//! the same node until that node is removed and never aliases a later one.
//! The arena holds at most as many slots as the peak number of live nodes.

use std::collections::BTreeMap;

use ripple_proto::escape::escape_into;
use ripple_proto::{BoundaryMarker, MarkerComment, MarkerError};
use thiserror::Error;

/// Elements that never have children or a closing tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// True for void element tags.
pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// Elements whose content is raw text (no markup, no character references).
pub(crate) fn is_raw_text(tag: &str) -> bool {
    matches!(tag, "script" | "style")
}

/// Stable handle to a node of a [`Document`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeKey {
    slot: usize,
    generation: u32,
}

/// An element: tag, markup attributes and live properties.
///
/// Properties model state the user changes in place (such as the current
/// value of an input). Markup never carries them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    tag: String,
    attributes: Vec<(String, String)>,
    properties: BTreeMap<String, String>,
}

impl Element {
    /// Creates an element with no attributes. The tag is lowercased.
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Lowercase tag name.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Attribute value by name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Attributes in source order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.attributes.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Sets or replaces an attribute.
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => value.clone_into(v),
            None => self.attributes.push((name.to_owned(), value.to_owned())),
        }
    }

    /// Removes an attribute, returning its value.
    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(n, _)| n == name)?;
        Some(self.attributes.remove(index).1)
    }

    /// Merge key (`key` attribute), if any.
    pub fn key(&self) -> Option<&str> {
        self.attribute("key")
    }

    /// Live property by name.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Sets a live property.
    pub fn set_property(&mut self, name: &str, value: &str) {
        self.properties.insert(name.to_owned(), value.to_owned());
    }

    /// Clears a live property.
    pub fn remove_property(&mut self, name: &str) -> Option<String> {
        self.properties.remove(name)
    }

    /// Current form value: the live property, else the `value` attribute.
    pub fn value(&self) -> Option<&str> {
        self.property("value").or_else(|| self.attribute("value"))
    }
}

/// Payload of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    /// Document root (or a detached fragment container).
    Document,
    /// `<!DOCTYPE name>`.
    Doctype(String),
    /// Element.
    Element(Element),
    /// Text, already decoded.
    Text(String),
    /// Comment data (between `<!--` and `-->`).
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
}

/// Structural errors of DOM mutation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DomError {
    /// The node was removed or never existed.
    #[error("node {0:?} does not exist")]
    Missing(NodeKey),
    /// Only documents and non-void elements hold children.
    #[error("node {0:?} cannot hold children")]
    NotAContainer(NodeKey),
    /// The child is the parent or one of its ancestors.
    #[error("inserting {child:?} under {parent:?} would create a cycle")]
    Cycle {
        /// Prospective parent.
        parent: NodeKey,
        /// Node being inserted.
        child: NodeKey,
    },
}

/// Errors pairing boundary marker comments.
#[derive(Debug, Error)]
pub enum BoundaryError {
    /// A marker comment held an unreadable record.
    #[error(transparent)]
    Malformed(#[from] MarkerError),
    /// End record without an open begin record.
    #[error("boundary end {sequence} has no begin")]
    UnmatchedEnd {
        /// Sequence of the end record.
        sequence: u64,
    },
    /// Begin record never closed.
    #[error("boundary {sequence} is never closed")]
    Unclosed {
        /// Sequence of the begin record.
        sequence: u64,
    },
    /// End record closes a different boundary, or not among its begin's
    /// siblings.
    #[error("boundary end {sequence} is misnested")]
    Misnested {
        /// Sequence of the end record.
        sequence: u64,
    },
}

/// A paired interactive boundary in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryRange {
    /// Begin record.
    pub marker: BoundaryMarker,
    /// Common parent of both comments.
    pub parent: NodeKey,
    /// Begin comment node.
    pub begin: NodeKey,
    /// End comment node.
    pub end: NodeKey,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena-backed document tree.
#[derive(Debug, Clone)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<usize>,
    root: NodeKey,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        let mut doc = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeKey {
                slot: 0,
                generation: 0,
            },
        };
        doc.root = doc.create(NodeData::Document);
        doc
    }

    /// The document node.
    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// Allocates a detached node.
    pub fn create(&mut self, data: NodeData) -> NodeKey {
        let node = Node {
            data,
            parent: None,
            children: Vec::new(),
        };
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot];
            entry.node = Some(node);
            return NodeKey {
                slot,
                generation: entry.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeKey {
            slot: self.slots.len() - 1,
            generation: 0,
        }
    }

    /// Allocates a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeKey {
        self.create(NodeData::Element(Element::new(tag)))
    }

    /// Allocates a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeKey {
        self.create(NodeData::Text(text.to_owned()))
    }

    fn node(&self, key: NodeKey) -> Option<&Node> {
        self.slots
            .get(key.slot)
            .filter(|s| s.generation == key.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.slots
            .get_mut(key.slot)
            .filter(|s| s.generation == key.generation)
            .and_then(|s| s.node.as_mut())
    }

    /// Slots allocated so far, live or free.
    #[cfg(test)]
    pub(crate) fn allocated_slots(&self) -> usize {
        self.slots.len()
    }

    /// True while `key` names a live node.
    pub fn contains(&self, key: NodeKey) -> bool {
        self.node(key).is_some()
    }

    /// Node payload.
    pub fn data(&self, key: NodeKey) -> Option<&NodeData> {
        self.node(key).map(|n| &n.data)
    }

    /// Mutable node payload.
    pub fn data_mut(&mut self, key: NodeKey) -> Option<&mut NodeData> {
        self.node_mut(key).map(|n| &mut n.data)
    }

    /// Element payload, if `key` is an element.
    pub fn element(&self, key: NodeKey) -> Option<&Element> {
        match self.data(key)? {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Mutable element payload, if `key` is an element.
    pub fn element_mut(&mut self, key: NodeKey) -> Option<&mut Element> {
        match self.data_mut(key)? {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Parent of `key`.
    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.node(key).and_then(|n| n.parent)
    }

    /// Children of `key` (empty for unknown keys).
    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        self.node(key).map_or(&[][..], |n| n.children.as_slice())
    }

    fn is_container(&self, key: NodeKey) -> bool {
        match self.data(key) {
            Some(NodeData::Document) => true,
            Some(NodeData::Element(element)) => !is_void(element.tag()),
            _ => false,
        }
    }

    /// Inserts `child` under `parent` at `index` (clamped), detaching it
    /// from its previous parent first.
    pub fn insert(&mut self, parent: NodeKey, index: usize, child: NodeKey) -> Result<(), DomError> {
        if !self.contains(parent) {
            return Err(DomError::Missing(parent));
        }
        if !self.contains(child) {
            return Err(DomError::Missing(child));
        }
        if !self.is_container(parent) {
            return Err(DomError::NotAContainer(parent));
        }
        let mut ancestor = Some(parent);
        while let Some(a) = ancestor {
            if a == child {
                return Err(DomError::Cycle { parent, child });
            }
            ancestor = self.parent(a);
        }

        self.detach(child)?;
        let Some(parent_node) = self.node_mut(parent) else {
            return Err(DomError::Missing(parent));
        };
        let index = index.min(parent_node.children.len());
        parent_node.children.insert(index, child);
        if let Some(child_node) = self.node_mut(child) {
            child_node.parent = Some(parent);
        }
        Ok(())
    }

    /// Appends `child` as the last child of `parent`.
    pub fn append(&mut self, parent: NodeKey, child: NodeKey) -> Result<(), DomError> {
        self.insert(parent, usize::MAX, child)
    }

    /// Unlinks `key` from its parent; the subtree stays allocated.
    pub fn detach(&mut self, key: NodeKey) -> Result<(), DomError> {
        let parent = self
            .node_mut(key)
            .ok_or(DomError::Missing(key))?
            .parent
            .take();
        if let Some(parent) = parent.and_then(|p| self.node_mut(p)) {
            parent.children.retain(|&c| c != key);
        }
        Ok(())
    }

    /// Detaches `key` and frees its whole subtree.
    pub fn remove(&mut self, key: NodeKey) -> Result<(), DomError> {
        self.detach(key)?;
        let mut stack = vec![key];
        while let Some(next) = stack.pop() {
            let Some(slot) = self
                .slots
                .get_mut(next.slot)
                .filter(|s| s.generation == next.generation)
            else {
                continue;
            };
            if let Some(node) = slot.node.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(next.slot);
                stack.extend(node.children);
            }
        }
        Ok(())
    }

    /// Descendants of `key` in document order (excluding `key`).
    pub fn descendants(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeKey> = self.children(key).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev());
        }
        out
    }

    /// First element (document order) whose `id` attribute equals `id`.
    pub fn element_by_id(&self, id: &str) -> Option<NodeKey> {
        self.descendants(self.root)
            .into_iter()
            .find(|&k| self.element(k).and_then(|e| e.attribute("id")) == Some(id))
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, key: NodeKey) -> String {
        let mut out = String::new();
        for k in self.descendants(key) {
            if let Some(NodeData::Text(text)) = self.data(k) {
                out.push_str(text);
            }
        }
        out
    }

    /// Markup of `key`'s children.
    pub fn inner_html(&self, key: NodeKey) -> String {
        let mut out = String::new();
        let raw = self.element(key).is_some_and(|e| is_raw_text(e.tag()));
        for &child in self.children(key) {
            self.serialize_into(&mut out, child, raw);
        }
        out
    }

    /// Markup of `key` itself.
    pub fn outer_html(&self, key: NodeKey) -> String {
        let mut out = String::new();
        self.serialize_into(&mut out, key, false);
        out
    }

    fn serialize_into(&self, out: &mut String, key: NodeKey, raw_text: bool) {
        let Some(data) = self.data(key) else {
            return;
        };
        match data {
            NodeData::Document => {
                for &child in self.children(key) {
                    self.serialize_into(out, child, false);
                }
            }
            NodeData::Doctype(name) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(name);
                out.push('>');
            }
            NodeData::Text(text) if raw_text => out.push_str(text),
            NodeData::Text(text) => escape_into(out, text),
            NodeData::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
            NodeData::Element(element) => {
                out.push('<');
                out.push_str(element.tag());
                for (name, value) in element.attributes() {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_into(out, value);
                    out.push('"');
                }
                out.push('>');
                if is_void(element.tag()) {
                    return;
                }
                let raw = is_raw_text(element.tag());
                for &child in self.children(key) {
                    self.serialize_into(out, child, raw);
                }
                out.push_str("</");
                out.push_str(element.tag());
                out.push('>');
            }
        }
    }

    /// Pairs every boundary marker comment in the document.
    ///
    /// Ranges are ordered by sequence number.
    pub fn boundaries(&self) -> Result<Vec<BoundaryRange>, BoundaryError> {
        let mut open: Vec<(BoundaryMarker, NodeKey, Option<NodeKey>)> = Vec::new();
        let mut ranges = Vec::new();
        for key in self.descendants(self.root) {
            let Some(NodeData::Comment(comment)) = self.data(key) else {
                continue;
            };
            match MarkerComment::parse(comment) {
                None => {}
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(MarkerComment::Begin(marker))) => open.push((marker, key, self.parent(key))),
                Some(Ok(MarkerComment::End { sequence })) => {
                    let (marker, begin, parent) =
                        open.pop().ok_or(BoundaryError::UnmatchedEnd { sequence })?;
                    if marker.sequence != sequence || parent != self.parent(key) {
                        return Err(BoundaryError::Misnested { sequence });
                    }
                    let Some(parent) = parent else {
                        return Err(BoundaryError::Misnested { sequence });
                    };
                    ranges.push(BoundaryRange {
                        marker,
                        parent,
                        begin,
                        end: key,
                    });
                }
            }
        }
        if let Some((marker, _, _)) = open.pop() {
            return Err(BoundaryError::Unclosed {
                sequence: marker.sequence,
            });
        }
        ranges.sort_by_key(|r| r.marker.sequence);
        Ok(ranges)
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Incremental HTML tree builder.
//!
//! Handles the markup the renderer produces: elements with quoted or bare
//! attributes, void elements, raw-text `script`/`style`, comments, doctype
//! and character references. Input is assumed well-formed; stray end tags
//! are ignored and unclosed elements are closed at [`TreeBuilder::finish`].
//!
//! Input may arrive in arbitrary pieces. A token cut off at the end of a
//! piece is held back until the rest arrives.

use ripple_proto::escape::unescape;
use tracing::trace;

use crate::dom::{is_raw_text, is_void, Document, Element, NodeData, NodeKey};

/// Streaming tree builder appending into a container node.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    container: NodeKey,
    open: Vec<NodeKey>,
    pending: String,
}

/// Outcome of one tokenizer step.
enum Step {
    /// Consumed this many bytes.
    Consumed(usize),
    /// The token at the cursor is incomplete.
    NeedMore,
}

impl TreeBuilder {
    /// Builder appending top-level nodes to `container`.
    pub fn new(container: NodeKey) -> Self {
        Self {
            container,
            open: Vec::new(),
            pending: String::new(),
        }
    }

    /// Parses as much of `text` (plus anything held back) as is complete.
    pub fn feed(&mut self, doc: &mut Document, text: &str) {
        self.pending.push_str(text);
        self.run(doc, false);
    }

    /// Parses everything held back and closes all open elements.
    pub fn finish(&mut self, doc: &mut Document) {
        self.run(doc, true);
        self.open.clear();
    }

    fn current(&self) -> NodeKey {
        self.open.last().copied().unwrap_or(self.container)
    }

    fn run(&mut self, doc: &mut Document, eof: bool) {
        let input = std::mem::take(&mut self.pending);
        let mut pos = 0;
        while pos < input.len() {
            match self.step(doc, &input[pos..], eof) {
                Step::Consumed(n) => pos += n,
                Step::NeedMore => break,
            }
        }
        self.pending = input[pos..].to_owned();
        if !self.pending.is_empty() {
            trace!(held = self.pending.len(), "holding back partial token");
        }
    }

    fn step(&mut self, doc: &mut Document, rest: &str, eof: bool) -> Step {
        let current = self.current();
        if let Some(tag) = doc.element(current).map(Element::tag).filter(|t| is_raw_text(t)) {
            let close = format!("</{tag}");
            return match find_ascii_ci(rest, &close) {
                Some(0) => self.end_tag(doc, rest, eof),
                Some(i) => {
                    self.text(doc, &rest[..i], true);
                    Step::Consumed(i)
                }
                None if eof => {
                    self.text(doc, rest, true);
                    Step::Consumed(rest.len())
                }
                None => Step::NeedMore,
            };
        }

        if let Some(body) = rest.strip_prefix("<!--") {
            return match body.find("-->") {
                Some(end) => {
                    let comment = doc.create(NodeData::Comment(body[..end].to_owned()));
                    self.attach(doc, comment);
                    Step::Consumed(4 + end + 3)
                }
                None if eof => {
                    let comment = doc.create(NodeData::Comment(body.to_owned()));
                    self.attach(doc, comment);
                    Step::Consumed(rest.len())
                }
                None => Step::NeedMore,
            };
        }
        if rest.starts_with("<!") {
            return match rest.find('>') {
                Some(end) => {
                    self.declaration(doc, &rest[2..end]);
                    Step::Consumed(end + 1)
                }
                None if eof => Step::Consumed(rest.len()),
                None => Step::NeedMore,
            };
        }
        if rest.starts_with("</") {
            return self.end_tag(doc, rest, eof);
        }
        if rest.starts_with('<') {
            match rest[1..].chars().next() {
                Some(c) if c.is_ascii_alphabetic() => return self.start_tag(doc, rest, eof),
                None if !eof => return Step::NeedMore,
                _ => {
                    self.text(doc, "<", false);
                    return Step::Consumed(1);
                }
            }
        }

        let end = rest.find('<').unwrap_or(rest.len());
        let mut chunk = &rest[..end];
        if !eof && end == rest.len() {
            // A character reference may continue in the next piece.
            if let Some(amp) = chunk.rfind('&').filter(|&i| !chunk[i..].contains(';')) {
                if amp == 0 {
                    return Step::NeedMore;
                }
                chunk = &chunk[..amp];
            }
        }
        self.text(doc, chunk, false);
        Step::Consumed(chunk.len())
    }

    fn start_tag(&mut self, doc: &mut Document, rest: &str, eof: bool) -> Step {
        let Some(end) = tag_end(rest) else {
            return if eof {
                Step::Consumed(rest.len())
            } else {
                Step::NeedMore
            };
        };
        let inner = &rest[1..end];
        let (inner, self_closing) = match inner.strip_suffix('/') {
            Some(stripped) => (stripped, true),
            None => (inner, false),
        };
        let name_end = inner
            .find(|c: char| c.is_ascii_whitespace() || c == '/')
            .unwrap_or(inner.len());
        let mut element = Element::new(&inner[..name_end]);
        for (name, value) in parse_attributes(&inner[name_end..]) {
            element.set_attribute(&name, &value);
        }
        let leaf = self_closing || is_void(element.tag());
        let key = doc.create(NodeData::Element(element));
        self.attach(doc, key);
        if !leaf {
            self.open.push(key);
        }
        Step::Consumed(end + 1)
    }

    fn end_tag(&mut self, doc: &mut Document, rest: &str, eof: bool) -> Step {
        let Some(end) = rest.find('>') else {
            return if eof {
                Step::Consumed(rest.len())
            } else {
                Step::NeedMore
            };
        };
        let name = rest[2..end].trim().to_ascii_lowercase();
        let position = self
            .open
            .iter()
            .rposition(|&k| doc.element(k).is_some_and(|e| e.tag() == name));
        match position {
            Some(index) => self.open.truncate(index),
            None => trace!(tag = %name, "ignoring stray end tag"),
        }
        Step::Consumed(end + 1)
    }

    fn declaration(&mut self, doc: &mut Document, body: &str) {
        let node = match body.get(..7) {
            Some(head) if head.eq_ignore_ascii_case("doctype") => {
                NodeData::Doctype(body[7..].trim().to_owned())
            }
            _ => NodeData::Comment(body.to_owned()),
        };
        let key = doc.create(node);
        self.attach(doc, key);
    }

    fn text(&mut self, doc: &mut Document, raw: &str, raw_text: bool) {
        if raw.is_empty() {
            return;
        }
        let decoded = if raw_text { raw.into() } else { unescape(raw) };
        let parent = self.current();
        // Text split across pieces continues the previous text node.
        if let Some(&last) = doc.children(parent).last() {
            if let Some(NodeData::Text(existing)) = doc.data_mut(last) {
                existing.push_str(&decoded);
                return;
            }
        }
        let key = doc.create_text(&decoded);
        self.attach(doc, key);
    }

    fn attach(&self, doc: &mut Document, key: NodeKey) {
        if let Err(err) = doc.append(self.current(), key) {
            trace!(%err, "dropping node that cannot be attached");
            if let Err(err) = doc.remove(key) {
                trace!(%err, "dropped node was already gone");
            }
        }
    }
}

/// Parses `markup` into detached top-level nodes owned by `doc`.
pub fn parse_fragment(doc: &mut Document, markup: &str) -> Vec<NodeKey> {
    let container = doc.create(NodeData::Document);
    let mut builder = TreeBuilder::new(container);
    builder.feed(doc, markup);
    builder.finish(doc);
    let nodes = doc.children(container).to_vec();
    for &node in &nodes {
        if let Err(err) = doc.detach(node) {
            trace!(%err, "fragment node vanished before detach");
        }
    }
    if let Err(err) = doc.remove(container) {
        trace!(%err, "fragment container already removed");
    }
    nodes
}

/// Parses a whole document.
pub fn parse_document(markup: &str) -> Document {
    let mut doc = Document::new();
    let mut builder = TreeBuilder::new(doc.root());
    builder.feed(&mut doc, markup);
    builder.finish(&mut doc);
    doc
}

/// Index of the `>` ending the tag at the start of `s`, skipping quoted
/// attribute values.
fn tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            (None, _) => {}
        }
    }
    None
}

fn parse_attributes(s: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = s;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == '/');
        if rest.is_empty() {
            break;
        }
        let name_end = rest
            .find(|c: char| c.is_ascii_whitespace() || c == '=' || c == '/')
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        rest = rest[name_end..].trim_start();
        let mut value = String::new();
        if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            let (raw, remainder) = match after_eq.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let body = &after_eq[1..];
                    let end = body.find(q).unwrap_or(body.len());
                    (&body[..end], body.get(end + 1..).unwrap_or_default())
                }
                _ => {
                    let end = after_eq
                        .find(|c: char| c.is_ascii_whitespace())
                        .unwrap_or(after_eq.len());
                    (&after_eq[..end], &after_eq[end..])
                }
            };
            value = unescape(raw).into_owned();
            rest = remainder;
        }
        if !name.is_empty() {
            out.push((name, value));
        }
    }
    out
}

fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

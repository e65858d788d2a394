// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Streaming update framing.
//!
//! Block layout:
//!
//! ``<update-block> WRAPPER* <update-block> FRAMING?``
//!
//! * WRAPPER is `<template component="ID">…</template>` for content updates,
//!   or a single `<template kind="error|redirection">…</template>`.
//! * FRAMING is `<!--ripple-frame:TOKEN-->`, omitted for the empty token.
//!
//! Opening and closing sentinels are the same literal; a reader alternates
//! between "outside" and "inside" on every occurrence.

use crate::escape::{escape_into, unescape};
use crate::{ComponentId, ComponentUpdate, FramingToken, StreamFrame, WireError};

/// Opening and closing sentinel of an out-of-band block.
pub const BLOCK_SENTINEL: &str = "<update-block>";
/// Start of a framing correlation comment.
pub const FRAMING_PREFIX: &str = "<!--ripple-frame:";
/// End of any HTML comment.
pub const COMMENT_END: &str = "-->";
/// Start of a wrapper element (attributes follow).
pub const WRAPPER_OPEN: &str = "<template";
/// Close of a wrapper element.
pub const WRAPPER_CLOSE: &str = "</template>";
/// Wrapper attribute carrying the component id.
pub const COMPONENT_ATTR: &str = "component";
/// Wrapper attribute carrying a terminal frame kind.
pub const KIND_ATTR: &str = "kind";
/// Comment data prefix opening a component region.
pub const REGION_START_PREFIX: &str = "c:";
/// Comment data prefix closing a component region.
pub const REGION_END_PREFIX: &str = "/c:";

/// Writes the framing comment for `token` (nothing for the empty token).
pub fn write_framing(out: &mut String, token: &FramingToken) {
    if token.is_empty() {
        return;
    }
    out.push_str(FRAMING_PREFIX);
    out.push_str(token.as_str());
    out.push_str(COMMENT_END);
}

/// Writes the block opener.
pub fn open_block(out: &mut String) {
    out.push_str(BLOCK_SENTINEL);
}

/// Writes the block closer followed by the framing comment.
pub fn close_block(out: &mut String, token: &FramingToken) {
    out.push_str(BLOCK_SENTINEL);
    write_framing(out, token);
}

/// Opens the wrapper for one component.
pub fn open_component(out: &mut String, id: ComponentId) {
    out.push_str(WRAPPER_OPEN);
    out.push(' ');
    out.push_str(COMPONENT_ATTR);
    out.push_str("=\"");
    out.push_str(&id.to_string());
    out.push_str("\">");
}

/// Closes a wrapper.
pub fn close_component(out: &mut String) {
    out.push_str(WRAPPER_CLOSE);
}

/// Writes `<!--c:ID-->`.
pub fn write_region_start(out: &mut String, id: ComponentId) {
    out.push_str("<!--");
    out.push_str(REGION_START_PREFIX);
    out.push_str(&id.to_string());
    out.push_str(COMMENT_END);
}

/// Writes `<!--/c:ID-->`.
pub fn write_region_end(out: &mut String, id: ComponentId) {
    out.push_str("<!--");
    out.push_str(REGION_END_PREFIX);
    out.push_str(&id.to_string());
    out.push_str(COMMENT_END);
}

/// A component-region comment recognised in a live document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionComment {
    /// `<!--c:ID-->`
    Start(ComponentId),
    /// `<!--/c:ID-->`
    End(ComponentId),
}

impl RegionComment {
    /// Parses comment data; `None` for anything that is not a region comment.
    pub fn parse(data: &str) -> Option<Self> {
        if let Some(id) = data.strip_prefix(REGION_END_PREFIX) {
            return id.parse().ok().map(RegionComment::End);
        }
        data.strip_prefix(REGION_START_PREFIX)?
            .parse()
            .ok()
            .map(RegionComment::Start)
    }
}

impl StreamFrame {
    /// Appends the encoded frame (block + framing comment) to `out`.
    ///
    /// An empty content update encodes to nothing.
    pub fn encode(&self, out: &mut String, token: &FramingToken) {
        match self {
            StreamFrame::ContentUpdate(updates) => {
                if updates.is_empty() {
                    return;
                }
                open_block(out);
                for update in updates {
                    open_component(out, update.id);
                    out.push_str(&update.markup);
                    close_component(out);
                }
                close_block(out, token);
            }
            StreamFrame::Error(message) => write_terminal(out, "error", message, token),
            StreamFrame::Redirection(url) => write_terminal(out, "redirection", url, token),
        }
    }
}

fn write_terminal(out: &mut String, kind: &str, text: &str, token: &FramingToken) {
    open_block(out);
    out.push_str(WRAPPER_OPEN);
    out.push(' ');
    out.push_str(KIND_ATTR);
    out.push_str("=\"");
    out.push_str(kind);
    out.push_str("\">");
    escape_into(out, text);
    close_component(out);
    close_block(out, token);
}

/// Decodes the content between two block sentinels.
pub fn parse_block(content: &str) -> Result<StreamFrame, WireError> {
    let mut updates = Vec::new();
    let mut terminal: Option<StreamFrame> = None;
    let mut pos = 0;

    loop {
        pos += content[pos..].len() - content[pos..].trim_start().len();
        if pos == content.len() {
            break;
        }
        let rest = &content[pos..];
        if !starts_wrapper(rest) {
            return Err(WireError::ExpectedWrapper(pos));
        }
        let tag_end = rest.find('>').ok_or(WireError::UnterminatedWrapper(pos))?;
        let attrs = parse_attributes(&rest[WRAPPER_OPEN.len()..tag_end]);
        let body_start = pos + tag_end + 1;
        let body_len =
            matching_close(&content[body_start..]).ok_or(WireError::UnterminatedWrapper(pos))?;
        let body = &content[body_start..body_start + body_len];
        pos = body_start + body_len + WRAPPER_CLOSE.len();

        if terminal.is_some() {
            return Err(WireError::MixedTerminalBlock);
        }
        let attr = |name: &str| {
            attrs
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.as_str())
        };
        match (attr(COMPONENT_ATTR), attr(KIND_ATTR)) {
            (Some(id), _) => updates.push(ComponentUpdate {
                id: id.parse()?,
                markup: body.to_owned(),
            }),
            (None, Some("error")) | (None, Some("redirection")) if !updates.is_empty() => {
                return Err(WireError::MixedTerminalBlock);
            }
            (None, Some("error")) => terminal = Some(StreamFrame::Error(unescape(body).into_owned())),
            (None, Some("redirection")) => {
                terminal = Some(StreamFrame::Redirection(unescape(body).into_owned()));
            }
            (None, other) => {
                return Err(WireError::UnknownWrapperKind(
                    other.unwrap_or_default().to_owned(),
                ))
            }
        }
    }

    Ok(terminal.unwrap_or(StreamFrame::ContentUpdate(updates)))
}

fn starts_wrapper(s: &str) -> bool {
    s.strip_prefix(WRAPPER_OPEN)
        .and_then(|after| after.chars().next())
        .is_some_and(|c| c == '>' || c == '/' || c.is_ascii_whitespace())
}

/// Byte offset of the `</template>` that closes the wrapper whose body starts
/// at the beginning of `body`, skipping nested templates.
fn matching_close(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut pos = 0;
    loop {
        let rest = &body[pos..];
        let close = rest.find(WRAPPER_CLOSE)?;
        let open = rest
            .match_indices(WRAPPER_OPEN)
            .map(|(i, _)| i)
            .find(|&i| starts_wrapper(&rest[i..]));
        match open {
            Some(open) if open < close => {
                depth += 1;
                pos += open + WRAPPER_OPEN.len();
            }
            _ => {
                if depth == 0 {
                    return Some(pos + close);
                }
                depth -= 1;
                pos += close + WRAPPER_CLOSE.len();
            }
        }
    }
}

/// Parses `name="value"` pairs. Values are unescaped; bare names get an empty
/// value.
fn parse_attributes(s: &str) -> Vec<(&str, String)> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| c == '=' || c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        rest = rest[name_end..].trim_start();
        let mut value = String::new();
        if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            if let Some(quoted) = after_eq.strip_prefix('"') {
                let end = quoted.find('"').unwrap_or(quoted.len());
                value = unescape(&quoted[..end]).into_owned();
                rest = quoted.get(end + 1..).unwrap_or_default();
            } else {
                let end = after_eq
                    .find(|c: char| c.is_ascii_whitespace())
                    .unwrap_or(after_eq.len());
                value = unescape(&after_eq[..end]).into_owned();
                rest = &after_eq[end..];
            }
        }
        if !name.is_empty() && name != "/" {
            out.push((name, value));
        }
        rest = rest.trim_start();
        if name.is_empty() {
            // Stray '=' or similar: skip one char so we always make progress.
            let mut chars = rest.chars();
            chars.next();
            rest = chars.as_str();
        }
    }
    out
}

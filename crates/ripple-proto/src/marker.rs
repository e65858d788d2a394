// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Interactive-boundary markers.
//!
//! A component that hosts a different interactive render mode is bracketed by
//! a begin record and an end record, each serialized as compact JSON inside an
//! HTML comment:
//!
//! ``<!--ripple:{"type":"server","sequence":3,"key":"cart"}-->``
//! … component markup …
//! ``<!--/ripple:{"sequence":3}-->``

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Comment data prefix of a begin record.
pub const BEGIN_PREFIX: &str = "ripple:";
/// Comment data prefix of an end record.
pub const END_PREFIX: &str = "/ripple:";

/// Interactive hosting mode of a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    /// Interactivity driven from the server over a live circuit.
    Server,
    /// Interactivity driven by a client-side runtime.
    WebAssembly,
    /// Mode picked by the client at activation time.
    Auto,
}

/// Begin record of an interactive boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryMarker {
    /// Hosting mode.
    #[serde(rename = "type")]
    pub kind: MarkerKind,
    /// Per-response sequence number; pairs the begin and end records.
    pub sequence: u64,
    /// Optional stable key supplied by the component author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct EndRecord {
    sequence: u64,
}

/// Errors raised while writing or reading marker records.
#[derive(Debug, Error)]
pub enum MarkerError {
    /// Record JSON could not be produced or parsed.
    #[error("marker record json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A parsed marker comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerComment {
    /// Begin record.
    Begin(BoundaryMarker),
    /// End record for the given sequence.
    End {
        /// Sequence of the matching begin record.
        sequence: u64,
    },
}

impl BoundaryMarker {
    /// Renders the begin and end comments together so callers can write both
    /// or neither.
    pub fn comments(&self) -> Result<(String, String), MarkerError> {
        let begin = comment_safe(&serde_json::to_string(self)?);
        let end = serde_json::to_string(&EndRecord {
            sequence: self.sequence,
        })?;
        Ok((
            format!("<!--{BEGIN_PREFIX}{begin}-->"),
            format!("<!--{END_PREFIX}{end}-->"),
        ))
    }
}

impl MarkerComment {
    /// Parses comment data (the text between `<!--` and `-->`).
    ///
    /// Returns `None` when the comment is not a marker at all.
    pub fn parse(data: &str) -> Option<Result<Self, MarkerError>> {
        if let Some(json) = data.strip_prefix(END_PREFIX) {
            return Some(
                serde_json::from_str::<EndRecord>(json)
                    .map(|r| MarkerComment::End {
                        sequence: r.sequence,
                    })
                    .map_err(MarkerError::from),
            );
        }
        let json = data.strip_prefix(BEGIN_PREFIX)?;
        Some(
            serde_json::from_str::<BoundaryMarker>(json)
                .map(MarkerComment::Begin)
                .map_err(MarkerError::from),
        )
    }
}

/// Rewrites characters that JSON allows inside strings but that would close
/// the comment or the surrounding `<template>`/block framing. None of them
/// occur outside strings in these records, and the escapes decode back to the
/// same key.
fn comment_safe(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut prev_dash = false;
    for ch in json.chars() {
        match ch {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '-' if prev_dash => {
                out.push_str("\\u002d");
                prev_dash = false;
                continue;
            }
            _ => out.push(ch),
        }
        prev_dash = ch == '-';
    }
    out
}

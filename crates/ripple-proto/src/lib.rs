// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire vocabulary for Ripple streaming updates.
//!
//! A streaming response carries the synchronously rendered page followed by
//! zero or more out-of-band blocks, each one self-delimiting:
//!
//! ``<update-block><template component="ID">markup</template>...<update-block><!--ripple-frame:TOKEN-->``
//!
//! Both the server encoder (`ripple-core`) and the client listener
//! (`ripple-client`) speak this vocabulary, so every literal lives here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod escape;
pub mod marker;
pub mod wire;

pub use marker::{BoundaryMarker, MarkerComment, MarkerError, MarkerKind};

/// Request header signalling a progressively-enhanced navigation.
pub const ENHANCED_NAV_HEADER: &str = "x-ripple-enhanced-nav";

/// Response header carrying the per-response framing token.
pub const FRAMING_HEADER: &str = "x-ripple-framing";

/// Opaque component identifier, unique for the lifetime of a render tree.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ComponentId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(ComponentId)
            .map_err(|_| WireError::BadComponentId(s.to_owned()))
    }
}

/// Per-response correlation id written as a comment around every frame.
///
/// The empty token means the request was not an enhanced navigation; no
/// framing comment is written at all in that case.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct FramingToken(String);

impl FramingToken {
    /// Token used when the request is not a progressively-enhanced navigation.
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Wraps an already generated correlation id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw correlation id (empty when framing is disabled).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when no framing comment is emitted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One component entry of a content update: the component and its full
/// subtree markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentUpdate {
    /// Component whose region is replaced.
    pub id: ComponentId,
    /// Rendered subtree markup (not escaped; component-authored).
    pub markup: String,
}

/// Frames that end a stream early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalFrame {
    /// Unrecoverable error after the response started.
    Error(String),
    /// Navigation requested after the response started.
    Redirection(String),
}

/// Logical frame carried by one out-of-band block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamFrame {
    /// Updated component subtrees, depth-ordered, non-overlapping.
    ContentUpdate(Vec<ComponentUpdate>),
    /// Error message (already gated by the host's diagnostics setting).
    Error(String),
    /// Redirection target URL.
    Redirection(String),
}

/// Errors raised while decoding wire vocabulary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Wrapper attribute did not hold a decimal component id.
    #[error("bad component id: {0:?}")]
    BadComponentId(String),
    /// Block content did not start with a wrapper element.
    #[error("expected <template> wrapper at byte {0}")]
    ExpectedWrapper(usize),
    /// Wrapper element was never closed.
    #[error("unterminated <template> wrapper starting at byte {0}")]
    UnterminatedWrapper(usize),
    /// Wrapper carried neither a component id nor a known kind.
    #[error("unknown wrapper kind: {0:?}")]
    UnknownWrapperKind(String),
    /// A terminal frame shared its block with other wrappers.
    #[error("terminal frame must be the only wrapper in its block")]
    MixedTerminalBlock,
}

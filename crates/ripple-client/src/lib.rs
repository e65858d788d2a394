// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! ripple-client: consumes a Ripple streaming response.
//!
//! [`StreamListener`] turns bytes into [`ListenerEvent`]s; [`read_stream`]
//! drives it from any `AsyncRead` into a [`StreamObserver`]; [`DomMerger`]
//! is the observer that builds the page and merges each content update into
//! its component region.
#![forbid(unsafe_code)]

pub mod dom;
pub mod html;
pub mod listener;
pub mod merge;
pub mod stream;

pub use dom::{BoundaryError, BoundaryRange, Document, DomError, Element, NodeData, NodeKey};
pub use listener::{ListenerError, ListenerEvent, StreamListener};
pub use merge::{DomMerger, MergeError, MergeReport};
pub use stream::{read_stream, ReadError, StreamObserver, StreamSummary};

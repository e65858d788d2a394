// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! ripple-core: server side of Ripple streaming rendering.
//!
//! A component engine re-evaluates its tree asynchronously and reports each
//! set of re-rendered components as a render batch. This crate turns batches
//! into out-of-band update frames:
//!
//! - [`tree`] resolves component depth over an ownership arena.
//! - [`dedup`] orders a batch by depth and drops entries already covered by
//!   an ancestor.
//! - [`session`] and [`encoder`] serialize the surviving subtrees with their
//!   region comments and boundary markers.
//! - [`coordinator`] owns the response writer and sequences every frame.
#![forbid(unsafe_code)]

pub mod coordinator;
pub mod dedup;
pub mod encoder;
mod error;
pub mod framing;
pub mod session;
pub mod tree;

pub use coordinator::{
    Completion, CoordinatorOptions, FlushCoordinator, Phase, RenderBatch, StreamEvent, Termination,
};
pub use dedup::{dedupe, ComponentIdAndDepth, VisitedSet};
pub use encoder::{ComponentSource, MarkupWriter};
pub use error::{ContractViolation, StreamError};
pub use session::{EncodedBatch, StreamingSession};
pub use tree::{depth, Boundary, ComponentTree, RenderTree, TreeError};

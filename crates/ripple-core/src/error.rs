// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types for streaming responses.

use thiserror::Error;

/// Programming errors in how a coordinator is driven.
///
/// Always raised before any byte is written for the offending call.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContractViolation {
    /// `begin_streaming` was called before `arm`.
    #[error("streaming was started before the response was armed")]
    NotArmed,
    /// `arm` was called without a framing decision from upstream.
    #[error("framing was never established for this response")]
    FramingNotEstablished,
    /// `arm` was called twice.
    #[error("response is already armed")]
    AlreadyArmed,
    /// The writer was already acquired by an earlier `begin_streaming`.
    #[error("streaming already started; only one producer may own the writer")]
    AlreadyStreaming,
}

/// Failures of a streaming response.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Misuse of the coordinator; nothing was written.
    #[error(transparent)]
    Contract(#[from] ContractViolation),
    /// The response writer failed (typically the client went away).
    #[error("response write failed: {0}")]
    Transport(#[from] std::io::Error),
    /// The engine failed after the response started. An error frame was
    /// written before this was returned.
    #[error("render failed after the response started: {0:#}")]
    Render(anyhow::Error),
}

impl StreamError {
    /// The contract violation, if this is one.
    pub fn contract_violation(&self) -> Option<ContractViolation> {
        match self {
            StreamError::Contract(violation) => Some(*violation),
            _ => None,
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Flush coordinator: the single owner of a streaming response writer.
//!
//! Lifecycle: `Unarmed → Armed → Streaming → Terminated(..)`.
//!
//! Frame order on the wire:
//! 1. framing opener + synchronous page (one flush)
//! 2. one content-update frame per non-empty render batch, in arrival order
//! 3. at most one terminal frame (error or redirection), always last

use ripple_proto::{ComponentId, FramingToken, StreamFrame};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::encoder::ComponentSource;
use crate::error::{ContractViolation, StreamError};
use crate::session::StreamingSession;

/// Error text sent to the client when verbose diagnostics are off.
pub const GENERIC_ERROR_MESSAGE: &str =
    "An unhandled error occurred while rendering this page. Enable verbose diagnostics on the server for details.";

/// Ordered ids of components that re-rendered together.
pub type RenderBatch = Vec<ComponentId>;

/// How a response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// All batches delivered; writer shut down cleanly.
    Normal,
    /// Render failure, transport failure, or misuse.
    Error,
    /// The engine navigated away mid-stream.
    Redirect,
}

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the framing decision.
    Unarmed,
    /// Framing recorded; the writer has not been acquired.
    Armed,
    /// The writer is owned by a running `begin_streaming`.
    Streaming,
    /// Final state; no further bytes will be written.
    Terminated(Termination),
}

/// Outcome reported by the component engine once rendering settles.
#[derive(Debug)]
pub enum Completion {
    /// No more batches.
    Completed,
    /// Navigate the client to this URL.
    Redirect(String),
    /// Rendering failed after the response started.
    Failed(anyhow::Error),
}

/// Message from the component engine to the coordinator.
#[derive(Debug)]
pub enum StreamEvent {
    /// Components re-rendered; encode and flush them.
    Batch(RenderBatch),
    /// Rendering settled.
    Finished(Completion),
}

/// Coordinator settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Send full error chains to the client instead of a generic message.
    pub verbose_diagnostics: bool,
}

/// Sequences every byte of one streaming response.
#[derive(Debug)]
pub struct FlushCoordinator {
    options: CoordinatorOptions,
    phase: Phase,
    session: Option<StreamingSession>,
}

impl FlushCoordinator {
    /// Creates an unarmed coordinator.
    pub fn new(options: CoordinatorOptions) -> Self {
        Self {
            options,
            phase: Phase::Unarmed,
            session: None,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Records the framing decision for this response.
    ///
    /// `None` means framing was never negotiated upstream.
    ///
    /// # Errors
    /// [`ContractViolation::FramingNotEstablished`] for `None`,
    /// [`ContractViolation::AlreadyArmed`] or
    /// [`ContractViolation::AlreadyStreaming`] outside the `Unarmed` phase.
    pub fn arm(&mut self, framing: Option<FramingToken>) -> Result<(), StreamError> {
        match self.phase {
            Phase::Unarmed => {}
            Phase::Armed => return Err(ContractViolation::AlreadyArmed.into()),
            Phase::Streaming | Phase::Terminated(_) => {
                return Err(ContractViolation::AlreadyStreaming.into())
            }
        }
        let framing = framing.ok_or(ContractViolation::FramingNotEstablished)?;
        debug!(framed = !framing.is_empty(), "response armed");
        self.session = Some(StreamingSession::new(framing));
        self.phase = Phase::Armed;
        Ok(())
    }

    /// Acquires `writer` and streams the response to completion.
    ///
    /// Writes the framing opener and the synchronous page rendered from
    /// `root`, then one frame per [`StreamEvent::Batch`] until the engine
    /// reports a [`Completion`]. A dropped sender counts as
    /// [`Completion::Completed`].
    ///
    /// # Errors
    /// - [`StreamError::Contract`] when not armed or called twice; nothing
    ///   is written to `writer`.
    /// - [`StreamError::Transport`] when a write or flush fails.
    /// - [`StreamError::Render`] for [`Completion::Failed`], after the error
    ///   frame has been written.
    pub async fn begin_streaming<W, S>(
        &mut self,
        mut writer: W,
        source: &S,
        root: ComponentId,
        mut events: mpsc::Receiver<StreamEvent>,
    ) -> Result<Termination, StreamError>
    where
        W: AsyncWrite + Unpin + Send,
        S: ComponentSource + Sync,
    {
        match self.phase {
            Phase::Armed => {}
            Phase::Unarmed => return Err(ContractViolation::NotArmed.into()),
            Phase::Streaming | Phase::Terminated(_) => {
                warn!("second producer tried to acquire the response writer");
                return Err(ContractViolation::AlreadyStreaming.into());
            }
        }
        let Some(mut session) = self.session.take() else {
            return Err(ContractViolation::NotArmed.into());
        };
        self.phase = Phase::Streaming;
        info!(root = %root, framed = !session.framing().is_empty(), "streaming started");

        let result = self
            .run(&mut writer, &mut session, source, root, &mut events)
            .await;
        let termination = match &result {
            Ok(termination) => *termination,
            Err(_) => Termination::Error,
        };
        self.phase = Phase::Terminated(termination);
        match &result {
            Ok(_) => info!(?termination, "streaming finished"),
            Err(err) => warn!(%err, "streaming terminated with error"),
        }
        result
    }

    async fn run<W, S>(
        &self,
        writer: &mut W,
        session: &mut StreamingSession,
        source: &S,
        root: ComponentId,
        events: &mut mpsc::Receiver<StreamEvent>,
    ) -> Result<Termination, StreamError>
    where
        W: AsyncWrite + Unpin + Send,
        S: ComponentSource + Sync,
    {
        writer.write_all(session.opener().as_bytes()).await?;
        let page = session.render_document(source, root);
        writer.write_all(page.as_bytes()).await?;
        writer.flush().await?;

        loop {
            match events.recv().await {
                Some(StreamEvent::Batch(batch)) => {
                    let encoded = session.encode_batch(source, &batch);
                    if !encoded.is_empty() {
                        write_frame(writer, encoded.text).await?;
                    }
                }
                Some(StreamEvent::Finished(completion)) => {
                    return self.finish(writer, session, completion).await;
                }
                None => {
                    debug!("engine dropped its event sender");
                    return self.finish(writer, session, Completion::Completed).await;
                }
            }
        }
    }

    async fn finish<W>(
        &self,
        writer: &mut W,
        session: &mut StreamingSession,
        completion: Completion,
    ) -> Result<Termination, StreamError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        match completion {
            Completion::Completed => {
                writer.shutdown().await?;
                Ok(Termination::Normal)
            }
            Completion::Redirect(url) => {
                info!(%url, "redirecting after response start");
                let text = session.encode_terminal(&StreamFrame::Redirection(url));
                write_frame(writer, text).await?;
                writer.shutdown().await?;
                Ok(Termination::Redirect)
            }
            Completion::Failed(err) => {
                let message = if self.options.verbose_diagnostics {
                    format!("{err:#}")
                } else {
                    GENERIC_ERROR_MESSAGE.to_owned()
                };
                let text = session.encode_terminal(&StreamFrame::Error(message));
                // The render failure is the error worth reporting even when
                // the client is already gone.
                if let Err(io) = write_frame(writer, text).await {
                    warn!(%io, "error frame not delivered");
                } else if let Err(io) = writer.shutdown().await {
                    warn!(%io, "writer shutdown failed");
                }
                Err(StreamError::Render(err))
            }
        }
    }
}

async fn write_frame<W>(writer: &mut W, text: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await?;
    debug!(bytes = text.len(), "frame flushed");
    Ok(())
}

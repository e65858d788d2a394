// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Async driver feeding a byte stream through a [`StreamListener`].

use ripple_proto::{ComponentUpdate, TerminalFrame};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use crate::listener::{ListenerError, ListenerEvent, StreamListener};

/// Receives decoded stream content in order.
pub trait StreamObserver {
    /// Static page text (may arrive in several pieces).
    fn on_document(&mut self, text: &str);
    /// One complete content-update block.
    fn on_content_update(&mut self, updates: &[ComponentUpdate]);
    /// Error or redirection frame.
    fn on_terminal(&mut self, frame: &TerminalFrame);
    /// The stream ended cleanly.
    fn on_finished(&mut self) {}
}

/// Failures of [`read_stream`].
#[derive(Debug, Error)]
pub enum ReadError {
    /// The transport failed.
    #[error("stream read failed: {0}")]
    Io(#[from] std::io::Error),
    /// The bytes could not be decoded.
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// What a completed [`read_stream`] saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Bytes read from the transport.
    pub bytes: usize,
    /// Number of reads that returned data.
    pub reads: usize,
    /// Content-update blocks dispatched.
    pub updates: usize,
    /// Terminal frame, if the stream ended with one.
    pub terminal: Option<TerminalFrame>,
}

/// Reads `reader` to the end in reads of at most `read_size` bytes,
/// dispatching events to `observer` as soon as each becomes complete.
pub async fn read_stream<R, O>(
    reader: &mut R,
    listener: &mut StreamListener,
    observer: &mut O,
    read_size: usize,
) -> Result<StreamSummary, ReadError>
where
    R: AsyncRead + Unpin + ?Sized,
    O: StreamObserver + ?Sized,
{
    let mut summary = StreamSummary::default();
    let mut buf = vec![0u8; read_size.max(1)];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        summary.bytes += n;
        summary.reads += 1;
        trace!(bytes = n, "read chunk");
        for event in listener.push(&buf[..n])? {
            dispatch(observer, event, &mut summary);
        }
    }
    for event in listener.finish()? {
        dispatch(observer, event, &mut summary);
    }
    observer.on_finished();
    debug!(
        bytes = summary.bytes,
        reads = summary.reads,
        updates = summary.updates,
        "stream finished"
    );
    Ok(summary)
}

fn dispatch<O: StreamObserver + ?Sized>(
    observer: &mut O,
    event: ListenerEvent,
    summary: &mut StreamSummary,
) {
    match event {
        ListenerEvent::Document(text) => observer.on_document(&text),
        ListenerEvent::Update(updates) => {
            summary.updates += 1;
            observer.on_content_update(&updates);
        }
        ListenerEvent::Terminal(frame) => {
            observer.on_terminal(&frame);
            summary.terminal = Some(frame);
        }
    }
}

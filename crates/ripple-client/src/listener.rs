// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Streaming response listener.
//!
//! Splits a response into static document text and out-of-band blocks,
//! independent of how the bytes were chunked in transit. Text that could be
//! the start of a block sentinel, a framing comment or a multi-byte
//! character is held back until the next chunk settles it.

use ripple_proto::wire::{parse_block, BLOCK_SENTINEL, COMMENT_END, FRAMING_PREFIX};
use ripple_proto::{ComponentUpdate, FramingToken, StreamFrame, TerminalFrame, WireError};
use thiserror::Error;
use tracing::{debug, warn};

/// Something the listener recognised in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// Static page text outside any block, framing comments removed.
    Document(String),
    /// One complete content-update block.
    Update(Vec<ComponentUpdate>),
    /// Error or redirection frame.
    Terminal(TerminalFrame),
}

/// Stream decoding failures.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// A block's content could not be decoded.
    #[error("malformed update block: {0}")]
    Wire(#[from] WireError),
    /// The stream ended inside a block.
    #[error("stream ended inside an update block ({buffered} bytes buffered)")]
    TruncatedBlock {
        /// Bytes of the unfinished block.
        buffered: usize,
    },
    /// The stream contained invalid UTF-8.
    #[error("invalid utf-8 at stream offset {offset}")]
    InvalidUtf8 {
        /// Absolute byte offset of the first invalid byte.
        offset: usize,
    },
}

/// Incremental stream parser.
///
/// Decoded text accumulates in `text`; bytes of a character split across
/// chunks wait in `partial`. `scanned` marks how far `text` has already been
/// searched for a block sentinel, so each byte is validated and searched
/// once however small the reads are.
#[derive(Debug, Default)]
pub struct StreamListener {
    text: String,
    partial: Vec<u8>,
    scanned: usize,
    consumed: usize,
    in_block: bool,
    expected: Option<FramingToken>,
}

impl StreamListener {
    /// Listener that accepts any framing token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener that logs framing comments not carrying `token`.
    pub fn expecting(token: FramingToken) -> Self {
        Self {
            expected: Some(token),
            ..Self::default()
        }
    }

    /// True while the stream is inside an unfinished block.
    pub fn in_block(&self) -> bool {
        self.in_block
    }

    /// Consumes one chunk and returns everything it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<ListenerEvent>, ListenerError> {
        self.decode(bytes)?;
        let mut events = Vec::new();
        self.drain(false, &mut events)?;
        Ok(events)
    }

    /// Ends the stream, flushing held-back document text.
    pub fn finish(&mut self) -> Result<Vec<ListenerEvent>, ListenerError> {
        if !self.partial.is_empty() {
            return Err(ListenerError::InvalidUtf8 {
                offset: self.consumed + self.text.len(),
            });
        }
        let mut events = Vec::new();
        self.drain(true, &mut events)?;
        if self.in_block || !self.text.is_empty() {
            return Err(ListenerError::TruncatedBlock {
                buffered: self.text.len(),
            });
        }
        Ok(events)
    }

    /// Appends the complete characters of `bytes` to `text`.
    fn decode(&mut self, bytes: &[u8]) -> Result<(), ListenerError> {
        let joined;
        let input = if self.partial.is_empty() {
            bytes
        } else {
            self.partial.extend_from_slice(bytes);
            joined = std::mem::take(&mut self.partial);
            joined.as_slice()
        };
        let (valid, rest) = match std::str::from_utf8(input) {
            Ok(valid) => (valid, &[][..]),
            Err(err) if err.error_len().is_some() => {
                return Err(ListenerError::InvalidUtf8 {
                    offset: self.consumed + self.text.len() + err.valid_up_to(),
                });
            }
            Err(err) => {
                let (head, tail) = input.split_at(err.valid_up_to());
                let head = std::str::from_utf8(head).map_err(|_| ListenerError::InvalidUtf8 {
                    offset: self.consumed + self.text.len(),
                })?;
                (head, tail)
            }
        };
        self.text.push_str(valid);
        self.partial.extend_from_slice(rest);
        Ok(())
    }

    /// Finds the next sentinel, skipping text already searched.
    fn find_sentinel(&mut self) -> Option<usize> {
        let mut from = self.scanned.saturating_sub(BLOCK_SENTINEL.len() - 1);
        while !self.text.is_char_boundary(from) {
            from -= 1;
        }
        let found = self.text[from..].find(BLOCK_SENTINEL).map(|at| from + at);
        if found.is_none() {
            self.scanned = self.text.len();
        }
        found
    }

    fn drain(&mut self, eof: bool, events: &mut Vec<ListenerEvent>) -> Result<(), ListenerError> {
        loop {
            let used = if self.in_block {
                let Some(close) = self.find_sentinel() else {
                    return Ok(());
                };
                let frame = parse_block(&self.text[..close])?;
                self.in_block = false;
                match frame {
                    StreamFrame::ContentUpdate(updates) if updates.is_empty() => {}
                    StreamFrame::ContentUpdate(updates) => {
                        debug!(components = updates.len(), "update block decoded");
                        events.push(ListenerEvent::Update(updates));
                    }
                    StreamFrame::Error(message) => {
                        events.push(ListenerEvent::Terminal(TerminalFrame::Error(message)));
                    }
                    StreamFrame::Redirection(url) => {
                        events.push(ListenerEvent::Terminal(TerminalFrame::Redirection(url)));
                    }
                }
                close + BLOCK_SENTINEL.len()
            } else if let Some(open) = self.find_sentinel() {
                self.emit_document(&self.text[..open], events);
                self.in_block = true;
                open + BLOCK_SENTINEL.len()
            } else {
                let safe = if eof {
                    self.text.len()
                } else {
                    settled_len(&self.text)
                };
                if safe == 0 {
                    return Ok(());
                }
                self.emit_document(&self.text[..safe], events);
                safe
            };

            self.text.drain(..used);
            self.consumed += used;
            self.scanned = self.scanned.saturating_sub(used);
        }
    }

    fn emit_document(&self, text: &str, events: &mut Vec<ListenerEvent>) {
        let stripped = self.strip_framing(text);
        if stripped.is_empty() {
            return;
        }
        // Adjacent document pieces are coalesced.
        if let Some(ListenerEvent::Document(previous)) = events.last_mut() {
            previous.push_str(&stripped);
        } else {
            events.push(ListenerEvent::Document(stripped));
        }
    }

    /// Removes framing comments, checking their token.
    fn strip_framing(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find(FRAMING_PREFIX) {
            let after = &rest[start + FRAMING_PREFIX.len()..];
            let Some(end) = after.find(COMMENT_END) else {
                break;
            };
            let token = &after[..end];
            if let Some(expected) = &self.expected {
                if expected.as_str() != token {
                    warn!(
                        expected = expected.as_str(),
                        found = token,
                        "framing token mismatch"
                    );
                }
            }
            out.push_str(&rest[..start]);
            rest = &after[end + COMMENT_END.len()..];
        }
        out.push_str(rest);
        out
    }
}

/// Length of the prefix of `text` that cannot turn into a sentinel or a
/// framing comment once more bytes arrive.
fn settled_len(text: &str) -> usize {
    let Some(lt) = text.rfind('<') else {
        return text.len();
    };
    let tail = &text[lt..];
    let undecided = BLOCK_SENTINEL.starts_with(tail)
        || FRAMING_PREFIX.starts_with(tail)
        || (tail.starts_with(FRAMING_PREFIX) && !tail.contains(COMMENT_END));
    if undecided {
        lt
    } else {
        text.len()
    }
}

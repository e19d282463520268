//! Incremental UTF-8 decoding of the inbound byte stream.
//!
//! The framer never splits on line boundaries: each chunk read from the
//! device yields at most one record, and joining records for display is the
//! sink's concern. A multi-byte character cut at a chunk boundary is held
//! back until the rest of it arrives.

use crate::core::record::InboundRecord;
use std::char::REPLACEMENT_CHARACTER;

/// Longest prefix of a UTF-8 sequence that can still be incomplete
const MAX_PENDING: usize = 3;

#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(MAX_PENDING),
        }
    }

    /// Decode a chunk and stamp the result with the current time.
    ///
    /// Returns `None` when the chunk only carried part of a character.
    pub fn on_chunk(&mut self, chunk: &[u8]) -> Option<InboundRecord> {
        let text = self.decode(chunk);
        if text.is_empty() {
            None
        } else {
            Some(InboundRecord::new(text))
        }
    }

    /// Decode a chunk, carrying an incomplete trailing sequence over to the
    /// next call. Invalid sequences become U+FFFD.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(chunk);

        let mut text = String::with_capacity(input.len());
        let mut rest: &[u8] = &input;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));

                    match e.error_len() {
                        Some(len) => {
                            text.push(REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }

        text
    }

    /// Flush a dangling partial sequence once no more input will arrive
    pub fn finish(&mut self) -> Option<InboundRecord> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending.clear();
        Some(InboundRecord::new(REPLACEMENT_CHARACTER.to_string()))
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Bytes held back waiting for the rest of a character
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

//! Streaming reply splitter
//!
//! Serial reads can return a fraction of a reply or several replies at once.
//! [`LineCodec`] buffers bytes and hands out one `;`-terminated line at a time.

use crate::TERMINATOR;

/// Maximum reply length kept in the buffer before old bytes are discarded
const MAX_LINE_LEN: usize = 128;

/// Buffering splitter for `;`-terminated CAT replies
#[derive(Debug, Default)]
pub struct LineCodec {
    buffer: Vec<u8>,
}

impl LineCodec {
    /// Create an empty codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_LINE_LEN),
        }
    }

    /// Push raw bytes into the buffer
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // A rig that never terminates would otherwise grow us without bound
        if self.buffer.len() > MAX_LINE_LEN * 4 {
            let start = self.buffer.len() - MAX_LINE_LEN;
            self.buffer.drain(..start);
        }
    }

    /// Take the next complete line, terminator included
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let term_pos = self.buffer.iter().position(|&b| b == TERMINATOR)?;
        Some(self.buffer.drain(..=term_pos).collect())
    }

    /// Bytes buffered without a terminator yet
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop whatever is buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

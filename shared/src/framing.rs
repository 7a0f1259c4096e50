//! Record reassembly for newline-delimited streams.
//!
//! A socket read may return half a record, several records, or a record and a
//! half. [`Reassembler`] buffers whatever it is fed and hands back only the
//! complete records, keeping the unfinished tail for the next read.

use crate::{MAX_RECORD_LEN, RECORD_DELIMITER};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// The unfinished record grew past the limit without a delimiter.
    #[error("record exceeds {limit} bytes without a delimiter")]
    RecordTooLong { limit: usize },
}

/// Splits a chunked byte stream into delimiter-terminated records.
///
/// Pure buffering: it never blocks and never drops bytes that belong to a
/// record it has not returned yet. The unfinished tail is capped at
/// `max_record_len`; a stream that exceeds it is unrecoverable.
#[derive(Debug)]
pub struct Reassembler {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to contain no delimiter.
    scanned: usize,
    /// Bytes fed since the last delimiter.
    tail_len: usize,
    max_record_len: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::with_limit(MAX_RECORD_LEN)
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn with_limit(max_record_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            tail_len: 0,
            max_record_len,
        }
    }

    /// Appends freshly read bytes. An empty slice marks end-of-stream and is a no-op.
    ///
    /// Fails once the unfinished record is longer than the limit. The bytes are
    /// still buffered; callers are expected to drop the stream.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), FramingError> {
        self.buffer.extend_from_slice(bytes);

        self.tail_len = match bytes.iter().rposition(|b| *b == RECORD_DELIMITER) {
            Some(last) => bytes.len() - last - 1,
            None => self.tail_len + bytes.len(),
        };

        if self.tail_len > self.max_record_len {
            return Err(FramingError::RecordTooLong {
                limit: self.max_record_len,
            });
        }
        Ok(())
    }

    /// Removes and returns every complete record, delimiter stripped, in stream order.
    ///
    /// Records consisting only of whitespace are dropped. Bytes after the last
    /// delimiter stay buffered.
    pub fn take_records(&mut self) -> Vec<Vec<u8>> {
        let mut records = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;

        while let Some(offset) = self.buffer[search_from..]
            .iter()
            .position(|b| *b == RECORD_DELIMITER)
        {
            let end = search_from + offset;
            let record = &self.buffer[start..end];
            if !record.iter().all(u8::is_ascii_whitespace) {
                records.push(record.to_vec());
            }
            start = end + 1;
            search_from = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        records
    }

    /// Number of buffered bytes belonging to an unfinished record.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.tail_len = 0;
    }
}

/// Appends the record delimiter to a raw record.
pub fn frame(record: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(record.len() + 1);
    framed.extend_from_slice(record);
    framed.push(RECORD_DELIMITER);
    framed
}

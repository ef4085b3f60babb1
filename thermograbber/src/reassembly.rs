/*!
Fixed-size stream reassembly.

TCP delivers the camera's byte stream in arbitrary chunks. The reassembler
accumulates those chunks and slices complete fixed-size units off the front,
in arrival order. There is no resynchronisation: the stream is assumed to
start on a unit boundary.

The buffer is a `BytesMut`; `split_to` advances its start instead of
shifting the remaining bytes, and the freed space is reclaimed by later
appends.
*/

use bytes::{Bytes, BytesMut};
use std::num::NonZeroUsize;
use tracing::trace;

/// Reassembly counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub bytes_received: u64,
    pub units_emitted: u64,
    pub pending_bytes: usize,
}

/// Accumulates chunks and emits complete units
pub struct StreamReassembler {
    buffer: BytesMut,
    unit_size: usize,
    bytes_received: u64,
    units_emitted: u64,
}

impl StreamReassembler {
    /// Create a reassembler that emits units of `unit_size` bytes
    pub fn new(unit_size: NonZeroUsize) -> Self {
        let unit_size = unit_size.get();
        Self {
            buffer: BytesMut::with_capacity(unit_size * 2),
            unit_size,
            bytes_received: 0,
            units_emitted: 0,
        }
    }

    /// Append `chunk` and return every unit it completed, oldest first.
    ///
    /// After this returns, fewer than `unit_size` bytes remain buffered.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        self.bytes_received += chunk.len() as u64;

        let mut units = Vec::with_capacity(self.buffer.len() / self.unit_size);
        while self.buffer.len() >= self.unit_size {
            units.push(self.buffer.split_to(self.unit_size).freeze());
        }
        self.units_emitted += units.len() as u64;

        if !units.is_empty() {
            trace!(units = units.len(), pending = self.buffer.len(), "Reassembled units");
        }

        units
    }

    /// Bytes of an incomplete unit waiting for more data
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn stats(&self) -> ReassemblyStats {
        ReassemblyStats {
            bytes_received: self.bytes_received,
            units_emitted: self.units_emitted,
            pending_bytes: self.buffer.len(),
        }
    }
}

//! Frame buffer for one in-flight backend exchange.
//!
//! A `FrameBuffer` owns exactly one pooled chunk for the lifetime of an
//! exchange. Socket reads append raw bytes at the write cursor; the
//! driver consumes complete packets through views into the chunk, never
//! through copies. Outbound request packets are staged into the same
//! chunk before the buffer is handed over to response framing.

use std::sync::Arc;

use sqlgate_core::{Error, Result};
use sqlgate_pool::{Chunk, ChunkPool};

use crate::protocol::PacketHeader;

/// A half-open byte range into the frame chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketView {
    pub start: usize,
    pub end: usize,
}

impl PacketView {
    /// Length of the viewed range in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the view covers zero bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Reassembles MySQL packets from fragmented socket reads.
///
/// Invariant: `read_pos <= write_pos <= capacity`. Bytes in
/// `read_pos..write_pos` are buffered but not yet consumed.
#[derive(Debug)]
pub struct FrameBuffer {
    pool: Arc<ChunkPool>,
    chunk: Option<Chunk>,
    read_pos: usize,
    write_pos: usize,
}

impl FrameBuffer {
    /// Check out a chunk from the pool and wrap it for framing.
    pub fn new(pool: &Arc<ChunkPool>) -> Self {
        Self {
            pool: Arc::clone(pool),
            chunk: Some(pool.acquire()),
            read_pos: 0,
            write_pos: 0,
        }
    }

    fn data(&self) -> &[u8] {
        self.chunk.as_ref().map_or(&[], Chunk::as_slice)
    }

    fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.chunk {
            Some(chunk) => chunk.as_mut_slice(),
            None => &mut [],
        }
    }

    /// Chunk capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data().len()
    }

    /// Number of buffered bytes not yet consumed.
    pub fn pending(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Whether no unconsumed bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// The free region for the next socket read.
    ///
    /// Compacts first when the tail is exhausted but consumed bytes can
    /// be reclaimed at the front.
    pub fn writable(&mut self) -> &mut [u8] {
        if self.write_pos == self.capacity() && self.read_pos > 0 {
            self.compact();
        }
        let write_pos = self.write_pos;
        &mut self.data_mut()[write_pos..]
    }

    /// Record `n` bytes appended by a socket read.
    pub fn advance_written(&mut self, n: usize) {
        debug_assert!(self.write_pos + n <= self.capacity());
        self.write_pos += n;
    }

    /// Shift unconsumed bytes to the front of the chunk.
    pub fn compact(&mut self) {
        let (read_pos, write_pos) = (self.read_pos, self.write_pos);
        self.data_mut().copy_within(read_pos..write_pos, 0);
        self.write_pos = write_pos - read_pos;
        self.read_pos = 0;
    }

    /// The next complete packet at the read cursor, if fully buffered.
    ///
    /// `Ok(None)` means more bytes are needed. A packet whose framed
    /// size exceeds the chunk capacity can never complete and is
    /// reported as a protocol error.
    pub fn next_packet(&self) -> Result<Option<(PacketHeader, PacketView)>> {
        if self.pending() < PacketHeader::SIZE {
            return Ok(None);
        }
        let data = self.data();
        let header = PacketHeader::from_bytes(&[
            data[self.read_pos],
            data[self.read_pos + 1],
            data[self.read_pos + 2],
            data[self.read_pos + 3],
        ]);
        let total = PacketHeader::SIZE + header.payload_length as usize;
        if total > self.capacity() {
            return Err(Error::protocol(format!(
                "incoming packet of {} bytes exceeds the {} byte frame chunk",
                total,
                self.capacity()
            )));
        }
        if self.pending() < total {
            return Ok(None);
        }
        let view = PacketView {
            start: self.read_pos + PacketHeader::SIZE,
            end: self.read_pos + total,
        };
        Ok(Some((header, view)))
    }

    /// The bytes covered by a view produced by this buffer.
    pub fn payload(&self, view: PacketView) -> &[u8] {
        &self.data()[view.start..view.end]
    }

    /// Consume the packet described by `header`, moving the read cursor
    /// past its payload. Resets both cursors when the buffer drains so
    /// the whole chunk is writable again.
    pub fn advance_past(&mut self, header: &PacketHeader) {
        self.read_pos += PacketHeader::SIZE + header.payload_length as usize;
        debug_assert!(self.read_pos <= self.write_pos);
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Stage an outbound packet built from `parts` (concatenated into
    /// one payload) under the given sequence id.
    ///
    /// The buffer must be empty; outbound staging happens before any
    /// response bytes arrive.
    pub fn encode_packet(&mut self, sequence_id: u8, parts: &[&[u8]]) -> Result<PacketView> {
        if !self.is_empty() {
            return Err(Error::protocol(
                "cannot stage a request into a non-empty frame buffer",
            ));
        }
        let payload_len: usize = parts.iter().map(|p| p.len()).sum();
        let total = PacketHeader::SIZE + payload_len;
        if total > self.capacity() {
            return Err(Error::oversized(format!(
                "request payload of {} bytes does not fit the {} byte frame chunk",
                payload_len,
                self.capacity()
            )));
        }
        #[allow(clippy::cast_possible_truncation)]
        let header = PacketHeader {
            payload_length: payload_len as u32,
            sequence_id,
        };
        let data = self.data_mut();
        data[..PacketHeader::SIZE].copy_from_slice(&header.to_bytes());
        let mut pos = PacketHeader::SIZE;
        for part in parts {
            data[pos..pos + part.len()].copy_from_slice(part);
            pos += part.len();
        }
        self.read_pos = 0;
        self.write_pos = total;
        Ok(PacketView {
            start: 0,
            end: total,
        })
    }

    /// Stage a fully pre-built packet (header included).
    pub fn stage_raw(&mut self, packet: &[u8]) -> Result<PacketView> {
        if !self.is_empty() {
            return Err(Error::protocol(
                "cannot stage a request into a non-empty frame buffer",
            ));
        }
        if packet.len() > self.capacity() {
            return Err(Error::oversized(format!(
                "request packet of {} bytes does not fit the {} byte frame chunk",
                packet.len(),
                self.capacity()
            )));
        }
        self.data_mut()[..packet.len()].copy_from_slice(packet);
        self.read_pos = 0;
        self.write_pos = packet.len();
        Ok(PacketView {
            start: 0,
            end: packet.len(),
        })
    }

    /// Return the chunk to the pool.
    pub fn release(self) {}
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(chunk) = self.chunk.take() {
            self.pool.release(chunk);
        }
    }
}

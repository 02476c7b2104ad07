//! Block headers threaded through the arena
//!
//! Every block, free or allocated, begins with a header written
//! directly into the arena bytes. Links are byte offsets rather than
//! addresses so they survive the arena moving on growth.

use std::mem::size_of;
use std::num::NonZeroUsize;

/// Payload starts are aligned to this many bytes
pub const ALIGNMENT: usize = 8;

/// Size in bytes of a header as laid out in the arena
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Round a byte count up to the next alignment boundary.
///
/// Counts already aligned map to themselves: `align_bytes(8) == 8`,
/// `align_bytes(9) == 16`. Callers reject zero before aligning.
pub fn align_bytes(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Metadata prefixing every region of the arena
///
/// A header describes the payload that immediately follows it and
/// links to the next header in ascending address order. It does not
/// own the bytes it links to; the arena owns everything and all
/// header mutation goes through the owning heap.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Usable bytes following the header, excluding the header itself
    payload_capacity: usize,
    /// The caller's pre-alignment request; zero while the block is free
    requested: usize,
    /// Offset of the next header; `None` terminates the list
    next: Option<NonZeroUsize>,
    free: bool,
}

impl BlockHeader {
    pub fn new(payload_capacity: usize, next: Option<usize>, free: bool) -> Self {
        BlockHeader {
            payload_capacity,
            requested: 0,
            next: next.and_then(NonZeroUsize::new),
            free,
        }
    }

    pub fn payload_capacity(&self) -> usize {
        self.payload_capacity
    }

    pub fn set_payload_capacity(&mut self, payload_capacity: usize) {
        self.payload_capacity = payload_capacity;
    }

    /// Header plus payload span in bytes
    pub fn block_size(&self) -> usize {
        HEADER_SIZE + self.payload_capacity
    }

    pub fn next(&self) -> Option<usize> {
        self.next.map(NonZeroUsize::get)
    }

    /// Link to another header by offset. The root block at offset
    /// zero is never a link target.
    pub fn set_next(&mut self, next: Option<usize>) {
        debug_assert!(next != Some(0));
        self.next = next.and_then(NonZeroUsize::new);
    }

    pub fn is_free(&self) -> bool {
        self.free
    }

    pub fn set_free(&mut self, free: bool) {
        self.free = free;
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn set_requested(&mut self, requested: usize) {
        self.requested = requested;
    }
}

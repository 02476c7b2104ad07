//! The free-list heap
//!
//! A first-fit allocator over a single owned arena. Block headers
//! live inline in the arena and link by offset; the heap owns the
//! backing store exclusively and is the only mutator of any header.
//! Single-threaded by design: callers serialise access externally.

use std::fmt::Debug;
use std::ptr::{read, write, NonNull};

use itertools::Itertools;
use thiserror::Error;

use super::header::{align_bytes, BlockHeader, ALIGNMENT, HEADER_SIZE};
use super::store::{BackingStore, GrowableStore, StoreError};

/// Offset of the root block's header
const ROOT: usize = 0;

/// Maximum single allocation size
pub const MAX_ALLOC_SIZE: usize = u32::MAX as usize;

/// Raw allocation handle: the payload's byte offset within the arena
///
/// Opaque to callers. The heap never trusts a handle; recovering the
/// owning header is a defensive walk of the block list, so a handle
/// the heap never issued is reported rather than corrupting the
/// arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(usize);

impl RawHandle {
    /// Wrap an arbitrary offset as a handle.
    ///
    /// Handles are validated on use, so constructing one that names
    /// no allocation is harmless; operations on it fail with
    /// [`HeapError::UnknownPointer`].
    pub fn from_offset(offset: usize) -> Self {
        RawHandle(offset)
    }

    /// Byte offset of the payload within the arena
    pub fn offset(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// Zero-byte request; a caller error, rejected before any state
    /// is touched
    #[error("invalid allocation size: requested 0 bytes")]
    InvalidSize,
    /// No free block fits and the store could not grow
    #[error("out of memory: failed to allocate {requested} bytes | arena: {capacity} bytes")]
    OutOfMemory { requested: usize, capacity: usize },
    /// A handle no tracked block owns
    #[error("unknown pointer: no allocated block owns offset {offset:#x}")]
    UnknownPointer { offset: usize },
    /// Freeing a block that is already free
    #[error("double free of block at offset {offset:#x}")]
    DoubleFree { offset: usize },
    /// Construction with an arena too small to hold the root block
    #[error("arena too small: {requested} bytes (minimum {minimum})")]
    ArenaTooSmall { requested: usize, minimum: usize },
    /// The backing store could not supply the initial reservation
    #[error("backing store reservation failed: {0}")]
    Store(#[from] StoreError),
}

/// Point-in-time snapshot of heap shape and counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Blocks carved beyond the root block (the `count_blocks` figure)
    pub blocks: usize,
    /// Free blocks anywhere in the list
    pub free_blocks: usize,
    /// Arena capacity in bytes
    pub arena_capacity: usize,
    /// Header-and-payload bytes across all servings since
    /// construction or reset
    pub total_bytes_allocated: usize,
    /// Pre-alignment bytes of the currently allocated blocks
    pub active_bytes_allocated: usize,
}

/// Operation counters, collected in debug builds or with the
/// `alloc-telemetry` feature; zeroed otherwise
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapMetrics {
    pub allocations: u64,
    pub frees: u64,
    pub splits: u64,
    pub merges: u64,
    pub grows: u64,
    pub failed_allocations: u64,
    pub peak_active_bytes: usize,
}

/// A block as seen from outside: where it is, how big, whether free
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockView {
    /// Header offset within the arena
    pub offset: usize,
    /// Usable bytes after the header
    pub payload_capacity: usize,
    /// Pre-alignment bytes recorded for an allocated block; zero for
    /// free blocks
    pub requested: usize,
    pub free: bool,
}

/// First-fit free-list allocator over a backing store's arena
///
/// The search is first fit in address order, not best fit; splitting
/// is in place and coalescing is eager in both directions on every
/// free. Freed blocks are retained for reuse and never returned to
/// the store.
pub struct Heap<S: BackingStore = GrowableStore> {
    store: S,
    total_bytes: usize,
    active_bytes: usize,
    metrics: HeapMetrics,
}

impl Heap {
    /// Heap over a growable store with the given initial reservation
    pub fn new(initial_capacity: usize) -> Result<Self, HeapError> {
        Heap::with_store(GrowableStore::reserve(initial_capacity)?)
    }
}

impl<S: BackingStore> Heap<S> {
    /// Heap over a pre-reserved backing store
    pub fn with_store(store: S) -> Result<Self, HeapError> {
        let minimum = HEADER_SIZE + ALIGNMENT;
        if store.capacity() < minimum {
            return Err(HeapError::ArenaTooSmall {
                requested: store.capacity(),
                minimum,
            });
        }
        let mut heap = Heap {
            store,
            total_bytes: 0,
            active_bytes: 0,
            metrics: HeapMetrics::default(),
        };
        let root = BlockHeader::new(heap.store.capacity() - HEADER_SIZE, None, true);
        heap.write_header(ROOT, root);
        Ok(heap)
    }

    /// Serve `size` bytes from the first free block that fits.
    ///
    /// The handle addresses the payload, 8-aligned, immediately after
    /// the block's header. On exhaustion the store is asked to grow
    /// once before the request fails; a failed request leaves every
    /// block and counter untouched.
    pub fn allocate(&mut self, size: usize) -> Result<RawHandle, HeapError> {
        if size == 0 {
            return Err(HeapError::InvalidSize);
        }
        if size > MAX_ALLOC_SIZE {
            self.note_failed_allocation();
            return Err(self.out_of_memory(size));
        }
        let aligned = align_bytes(size);

        let offset = match self.find_free_block(aligned) {
            Some(offset) => offset,
            None => {
                if self.grow_arena(aligned + HEADER_SIZE).is_err() {
                    self.note_failed_allocation();
                    return Err(self.out_of_memory(size));
                }
                match self.find_free_block(aligned) {
                    Some(offset) => offset,
                    None => {
                        self.note_failed_allocation();
                        return Err(self.out_of_memory(size));
                    }
                }
            }
        };

        self.place(offset, aligned, size);
        self.total_bytes += aligned + HEADER_SIZE;
        self.active_bytes += size;
        self.note_allocation();

        Ok(RawHandle(offset + HEADER_SIZE))
    }

    /// Release the block a handle names.
    ///
    /// Restores the coalescing invariant by absorbing a free
    /// successor into the block and then the block into a free
    /// predecessor, so no two adjacent blocks are left free.
    pub fn free(&mut self, handle: RawHandle) -> Result<(), HeapError> {
        let target = match handle.offset().checked_sub(HEADER_SIZE) {
            Some(offset) if offset % ALIGNMENT == 0 => offset,
            _ => {
                return Err(HeapError::UnknownPointer {
                    offset: handle.offset(),
                })
            }
        };

        let mut previous: Option<usize> = None;
        let mut cursor = Some(ROOT);
        while let Some(offset) = cursor {
            let mut block = self.header_at(offset);
            if offset == target {
                if block.is_free() {
                    return Err(HeapError::DoubleFree {
                        offset: handle.offset(),
                    });
                }

                debug_assert!(self.active_bytes >= block.requested());
                self.active_bytes -= block.requested();
                block.set_free(true);
                block.set_requested(0);

                if let Some(successor) = block.next() {
                    let next = self.header_at(successor);
                    if next.is_free() {
                        block.set_payload_capacity(block.payload_capacity() + next.block_size());
                        block.set_next(next.next());
                        self.note_merge();
                    }
                }
                self.write_header(offset, block);

                if let Some(prior) = previous {
                    let mut prev = self.header_at(prior);
                    if prev.is_free() {
                        prev.set_payload_capacity(prev.payload_capacity() + block.block_size());
                        prev.set_next(block.next());
                        self.write_header(prior, prev);
                        self.note_merge();
                    }
                }

                self.note_free();
                return Ok(());
            }
            previous = Some(offset);
            cursor = block.next();
        }

        Err(HeapError::UnknownPointer {
            offset: handle.offset(),
        })
    }

    /// Reinitialise to a single free block spanning every byte ever
    /// acquired from the store, zeroing both counters. Nothing is
    /// returned to the store.
    pub fn reset(&mut self) {
        let root = BlockHeader::new(self.store.capacity() - HEADER_SIZE, None, true);
        self.write_header(ROOT, root);
        self.total_bytes = 0;
        self.active_bytes = 0;
    }

    /// Count the blocks carved beyond the first.
    ///
    /// A fresh arena (one spanning free block) reports zero; every
    /// split adds one and every merge removes one.
    pub fn count_blocks(&self) -> usize {
        self.blocks().skip(1).count()
    }

    /// Header-and-payload bytes across all servings since
    /// construction or reset. Counts every serving, including re-use
    /// of freed blocks; only [`Heap::reset`] zeroes it.
    pub fn total_bytes_allocated(&self) -> usize {
        self.total_bytes
    }

    /// Pre-alignment bytes of the currently allocated blocks
    pub fn active_bytes_allocated(&self) -> usize {
        self.active_bytes
    }

    /// Arena capacity in bytes
    pub fn arena_capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Statistics
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            blocks: self.count_blocks(),
            free_blocks: self.blocks().filter(|b| b.free).count(),
            arena_capacity: self.store.capacity(),
            total_bytes_allocated: self.total_bytes,
            active_bytes_allocated: self.active_bytes,
        }
    }

    /// Snapshot of the operation counters.
    ///
    /// Counters advance only in debug builds or with the
    /// `alloc-telemetry` feature enabled.
    pub fn metrics(&self) -> HeapMetrics {
        self.metrics.clone()
    }

    /// Iterate the blocks in ascending address order
    pub fn blocks(&self) -> Blocks<'_, S> {
        Blocks {
            heap: self,
            cursor: Some(ROOT),
        }
    }

    /// Whether any two address-adjacent blocks are both free.
    ///
    /// Holds false between any two public operations; exposed for
    /// tests and debugging.
    pub fn has_adjacent_free_blocks(&self) -> bool {
        self.blocks().tuple_windows().any(|(a, b)| a.free && b.free)
    }

    /// Resolve a handle to the payload's address.
    ///
    /// Validated against the block list. The pointer is only good
    /// until the next growth, which may move the arena; prefer
    /// holding the handle.
    pub fn payload_ptr(&self, handle: RawHandle) -> Result<NonNull<u8>, HeapError> {
        self.live_block(handle)?;
        // SAFETY: live_block confirmed the offset lies within the
        // arena and names an allocated block; base is non-null
        unsafe {
            Ok(NonNull::new_unchecked(
                self.store.base().add(handle.offset()),
            ))
        }
    }

    /// Find the allocated block owning a handle
    pub(crate) fn live_block(&self, handle: RawHandle) -> Result<BlockHeader, HeapError> {
        let unknown = HeapError::UnknownPointer {
            offset: handle.offset(),
        };
        let target = match handle.offset().checked_sub(HEADER_SIZE) {
            Some(offset) if offset % ALIGNMENT == 0 => offset,
            _ => return Err(unknown),
        };
        let mut cursor = Some(ROOT);
        while let Some(offset) = cursor {
            let header = self.header_at(offset);
            if offset == target {
                if header.is_free() {
                    return Err(unknown);
                }
                return Ok(header);
            }
            cursor = header.next();
        }
        Err(unknown)
    }

    /// Payload address without the list walk; callers must have
    /// validated the handle already
    pub(crate) fn payload_ptr_unchecked(&self, handle: RawHandle) -> *mut u8 {
        debug_assert!(handle.offset() <= self.store.capacity());
        // SAFETY: offset is within the arena per the caller's
        // validation (debug-asserted above)
        unsafe { self.store.base().add(handle.offset()) }
    }

    /// First free block large enough for an aligned request
    fn find_free_block(&self, aligned: usize) -> Option<usize> {
        let mut cursor = Some(ROOT);
        while let Some(offset) = cursor {
            let header = self.header_at(offset);
            if header.is_free() && header.payload_capacity() >= aligned {
                return Some(offset);
            }
            cursor = header.next();
        }
        None
    }

    /// Extend the arena and link a fresh free block over the new
    /// bytes at the tail of the list
    fn grow_arena(&mut self, at_least: usize) -> Result<(), StoreError> {
        let span = self.store.grow(at_least)?;

        let tail = self.tail_offset();
        let mut tail_header = self.header_at(tail);
        tail_header.set_next(Some(span.offset));
        self.write_header(tail, tail_header);

        let fresh = BlockHeader::new(span.len - HEADER_SIZE, None, true);
        self.write_header(span.offset, fresh);
        self.note_grow();
        Ok(())
    }

    fn tail_offset(&self) -> usize {
        let mut offset = ROOT;
        while let Some(next) = self.header_at(offset).next() {
            offset = next;
        }
        offset
    }

    /// Shrink a free block to the aligned request, carving the slack
    /// into a new free block when a header fits in it, and mark the
    /// block used.
    ///
    /// When the slack cannot hold a header the block keeps its full
    /// capacity and the caller absorbs up to `HEADER_SIZE` bytes of
    /// internal fragmentation.
    fn place(&mut self, offset: usize, aligned: usize, requested: usize) {
        let mut block = self.header_at(offset);
        debug_assert!(block.is_free());
        debug_assert!(block.payload_capacity() >= aligned);

        let slack = block.payload_capacity() - aligned;
        if slack > HEADER_SIZE {
            let carved = offset + HEADER_SIZE + aligned;
            let fresh = BlockHeader::new(slack - HEADER_SIZE, block.next(), true);
            self.write_header(carved, fresh);
            block.set_next(Some(carved));
            block.set_payload_capacity(aligned);
            self.note_split();
        }
        block.set_free(false);
        block.set_requested(requested);
        self.write_header(offset, block);
    }

    /// Read the header at a block offset
    fn header_at(&self, offset: usize) -> BlockHeader {
        debug_assert!(offset % ALIGNMENT == 0);
        debug_assert!(offset + HEADER_SIZE <= self.store.capacity());
        // SAFETY: offsets come from the list the heap itself
        // maintains; every linked offset had a header written before
        // it was linked and lies within the arena
        unsafe { read(self.store.base().add(offset) as *const BlockHeader) }
    }

    fn write_header(&mut self, offset: usize, header: BlockHeader) {
        debug_assert!(offset % ALIGNMENT == 0);
        debug_assert!(offset + HEADER_SIZE <= self.store.capacity());
        // SAFETY: as for header_at; the write stays within the arena
        unsafe { write(self.store.base().add(offset) as *mut BlockHeader, header) }
    }

    fn out_of_memory(&self, requested: usize) -> HeapError {
        HeapError::OutOfMemory {
            requested,
            capacity: self.store.capacity(),
        }
    }

    fn note_allocation(&mut self) {
        #[cfg(any(debug_assertions, feature = "alloc-telemetry"))]
        {
            self.metrics.allocations += 1;
            if self.active_bytes > self.metrics.peak_active_bytes {
                self.metrics.peak_active_bytes = self.active_bytes;
            }
        }
    }

    fn note_free(&mut self) {
        #[cfg(any(debug_assertions, feature = "alloc-telemetry"))]
        {
            self.metrics.frees += 1;
        }
    }

    fn note_split(&mut self) {
        #[cfg(any(debug_assertions, feature = "alloc-telemetry"))]
        {
            self.metrics.splits += 1;
        }
    }

    fn note_merge(&mut self) {
        #[cfg(any(debug_assertions, feature = "alloc-telemetry"))]
        {
            self.metrics.merges += 1;
        }
    }

    fn note_grow(&mut self) {
        #[cfg(any(debug_assertions, feature = "alloc-telemetry"))]
        {
            self.metrics.grows += 1;
        }
    }

    fn note_failed_allocation(&mut self) {
        #[cfg(any(debug_assertions, feature = "alloc-telemetry"))]
        {
            self.metrics.failed_allocations += 1;
        }
    }
}

impl<S: BackingStore> Debug for Heap<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "arena {} bytes | total {} active {}",
            self.store.capacity(),
            self.total_bytes,
            self.active_bytes
        )?;
        for block in self.blocks() {
            writeln!(
                f,
                "({}) {:#08x} {:8} bytes",
                if block.free { "Fr" } else { "Us" },
                block.offset,
                block.payload_capacity,
            )?;
        }
        Ok(())
    }
}

/// Iterator over [`BlockView`]s in ascending address order
pub struct Blocks<'heap, S: BackingStore> {
    heap: &'heap Heap<S>,
    cursor: Option<usize>,
}

impl<'heap, S: BackingStore> Iterator for Blocks<'heap, S> {
    type Item = BlockView;

    fn next(&mut self) -> Option<BlockView> {
        let offset = self.cursor?;
        let header = self.heap.header_at(offset);
        self.cursor = header.next();
        Some(BlockView {
            offset,
            payload_capacity: header.payload_capacity(),
            requested: header.requested(),
            free: header.is_free(),
        })
    }
}

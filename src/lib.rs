//! # carve - a first-fit free-list allocator
//!
//! `carve` manages a single contiguous arena of raw bytes and serves
//! allocation and release requests from it. An intrusive list of
//! block headers is threaded through the arena itself:
//!
//! ```text
//!   ┌────────┬─────────────┬────────┬──────────┬────────┬─────────┐
//!   │ header │   payload   │ header │ payload  │ header │ payload │
//!   └────────┴─────────────┴────────┴──────────┴────────┴─────────┘
//!    ↑ root block           ↑ next in address order       ...
//! ```
//!
//! Headers link by byte offset rather than address, so the whole
//! arena can move when the backing store grows and every handle
//! stays valid. Allocation is first fit in address order with
//! in-place splitting; every free eagerly coalesces with both
//! neighbours, so no two adjacent blocks are ever left free. First
//! fit trades some memory utilisation for constant-time split
//! bookkeeping; freed blocks are retained for reuse and never
//! returned to the backing store.
//!
//! The heap is a single-threaded data structure with no internal
//! synchronisation; callers that share one across threads must
//! serialise access externally.
//!
//! ```
//! use carve::memory::heap::Heap;
//!
//! let mut heap = Heap::new(1024)?;
//! let handle = heap.allocate(48)?;
//! assert_eq!(handle.offset() % 8, 0);
//! heap.free(handle)?;
//! # Ok::<(), carve::memory::heap::HeapError>(())
//! ```
//!
//! A typed convenience layer stores `Copy` values without manual
//! size bookkeeping:
//!
//! ```
//! use carve::memory::heap::Heap;
//!
//! let mut heap = Heap::new(1024)?;
//! let answer = heap.alloc_value(42i64)?;
//! assert_eq!(heap.read_value(&answer)?, 42);
//! # Ok::<(), carve::memory::heap::HeapError>(())
//! ```

pub mod memory;

//! End-to-end allocation scenarios
//!
//! Each test drives the heap through a realistic sequence and checks
//! the externally observable contract: handles, counters and block
//! counts.

use carve::memory::header::{ALIGNMENT, HEADER_SIZE};
use carve::memory::heap::{Heap, HeapError, RawHandle};
use carve::memory::store::{BackingStore, FixedStore};
use matches::assert_matches;

/// A fresh growable heap of the conventional scenario size
fn heap() -> Heap {
    Heap::new(1024).expect("1024-byte arena")
}

#[test]
fn test_basic_allocation() {
    let mut heap = heap();
    assert_eq!(heap.active_bytes_allocated(), 0);
    assert_eq!(heap.total_bytes_allocated(), 0);

    heap.allocate(5).expect("able to allocate something");
    assert_eq!(heap.active_bytes_allocated(), 5);
    // a single aligned block
    assert_eq!(heap.total_bytes_allocated() - HEADER_SIZE, 8);
}

#[test]
fn test_multiple_allocations() {
    let mut heap = heap();
    for _ in 0..3 {
        heap.allocate(5).expect("able to allocate something");
    }
    assert_eq!(heap.active_bytes_allocated(), 15);
    assert_eq!(heap.total_bytes_allocated(), (8 + HEADER_SIZE) * 3);
}

#[test]
fn test_setting_values_at_allocations() {
    let mut heap = heap();
    let a = heap.alloc_value(11i32).unwrap();
    let b = heap.alloc_value(22i32).unwrap();
    let c = heap.alloc_value(33i32).unwrap();

    assert_eq!(heap.read_value(&a).unwrap(), 11);
    assert_eq!(heap.read_value(&b).unwrap(), 22);
    assert_eq!(heap.read_value(&c).unwrap(), 33);
}

#[test]
fn test_freeing_all_allocations() {
    let mut heap = heap();
    for _ in 0..3 {
        heap.allocate(5).unwrap();
    }
    assert!(heap.total_bytes_allocated() > 0);

    heap.reset();
    assert_eq!(heap.total_bytes_allocated(), 0);
    assert_eq!(heap.active_bytes_allocated(), 0);
    assert_eq!(heap.count_blocks(), 0);
}

#[test]
fn test_reuse_after_reset() {
    let mut heap = heap();
    let a1 = heap.alloc_value(11i32).unwrap();
    let b1 = heap.alloc_value(22i32).unwrap();
    let c1 = heap.alloc_value(33i32).unwrap();

    heap.reset();

    let a2 = heap.alloc_value(44i32).unwrap();
    let b2 = heap.alloc_value(55i32).unwrap();
    let c2 = heap.alloc_value(66i32).unwrap();

    // the arena is carved identically, so the old handles alias the
    // new allocations
    assert_eq!(a2, a1);
    assert_eq!(b2, b1);
    assert_eq!(c2, c1);
    assert_eq!(heap.read_value(&a1).unwrap(), 44);
    assert_eq!(heap.read_value(&b1).unwrap(), 55);
    assert_eq!(heap.read_value(&c1).unwrap(), 66);
}

#[test]
fn test_allocations_are_aligned() {
    let mut heap = heap();
    let a = heap.alloc_value(1i32).unwrap();
    let b = heap.alloc_value(2i32).unwrap();

    assert!(std::mem::size_of::<i32>() < ALIGNMENT);
    assert_eq!(HEADER_SIZE % ALIGNMENT, 0);
    // aligned 8 bytes apart, plus the header
    assert_eq!(b.raw().offset() - a.raw().offset(), 8 + HEADER_SIZE);
}

#[test]
fn test_values_can_be_freed() {
    let mut heap = heap();
    let a1 = heap.alloc_value(11i32).unwrap();
    let b1 = heap.alloc_value(22i32).unwrap();
    let c1 = heap.alloc_value(33i32).unwrap();

    heap.free_value(b1).unwrap();
    let b2 = heap.alloc_value(44i32).unwrap();

    // the re-allocation re-used the freed spot
    assert_eq!(b2, b1);
    assert_eq!(heap.read_value(&a1).unwrap(), 11);
    assert_eq!(heap.read_value(&b1).unwrap(), 44);
    assert_eq!(heap.read_value(&c1).unwrap(), 33);
}

#[test]
fn test_freeing_after_a_free_block_combines() {
    let mut heap = heap();
    let _ = heap.alloc_value(0i32).unwrap();
    let a = heap.alloc_value(0i32).unwrap();
    let b = heap.alloc_value(0i32).unwrap();
    let _ = heap.alloc_value(0i32).unwrap();

    assert_eq!(heap.count_blocks(), 4);
    heap.free_value(a).unwrap();
    heap.free_value(b).unwrap();
    assert_eq!(heap.count_blocks(), 3);
}

#[test]
fn test_freeing_before_a_free_block_combines() {
    let mut heap = heap();
    let _ = heap.alloc_value(0i32).unwrap();
    let a = heap.alloc_value(0i32).unwrap();
    let b = heap.alloc_value(0i32).unwrap();
    let _ = heap.alloc_value(0i32).unwrap();

    assert_eq!(heap.count_blocks(), 4);
    heap.free_value(b).unwrap();
    heap.free_value(a).unwrap();
    assert_eq!(heap.count_blocks(), 3);
}

#[test]
fn test_allocation_lands_in_merged_free_block() {
    let mut heap = heap();
    let a = heap.alloc_value(11i32).unwrap();
    let b = heap.alloc_value(22i32).unwrap();
    let c = heap.alloc_value(33i32).unwrap();
    let d = heap.alloc_value(44i32).unwrap();

    heap.free_value(b).unwrap();
    heap.free_value(c).unwrap();

    let e = heap.alloc_value(55i64).unwrap();
    assert_eq!(heap.read_value(&a).unwrap(), 11);
    assert_eq!(heap.read_value(&d).unwrap(), 44);
    assert_eq!(heap.read_value(&e).unwrap(), 55);

    // placed in the merged gap between a and d, at b's old spot
    assert!(a.raw().offset() < e.raw().offset());
    assert!(e.raw().offset() < d.raw().offset());
    assert_eq!(e.raw(), b.raw());
}

#[test]
fn test_invalid_size_and_unknown_pointer() {
    let mut heap = heap();
    let _ = heap.allocate(16).unwrap();
    let before = heap.stats();

    assert_matches!(heap.allocate(0), Err(HeapError::InvalidSize));
    assert_matches!(
        heap.free(RawHandle::from_offset(0x5000)),
        Err(HeapError::UnknownPointer { .. })
    );
    assert_eq!(heap.stats(), before);
}

#[test]
fn test_double_free_is_reported() {
    let mut heap = heap();
    let a = heap.allocate(16).unwrap();
    heap.free(a).unwrap();
    assert_matches!(heap.free(a), Err(HeapError::DoubleFree { .. }));
}

#[test]
fn test_fixed_store_exhaustion() {
    let store = FixedStore::reserve(256).unwrap();
    let mut heap = Heap::with_store(store).unwrap();

    let mut handles = Vec::new();
    loop {
        match heap.allocate(32) {
            Ok(handle) => handles.push(handle),
            Err(error) => {
                assert_matches!(error, HeapError::OutOfMemory { .. });
                break;
            }
        }
    }
    assert!(!handles.is_empty());

    // exhaustion is recoverable: free something and retry
    heap.free(handles[0]).unwrap();
    assert_eq!(heap.allocate(32).unwrap(), handles[0]);
}

#[test]
fn test_growth_past_initial_reservation() {
    let mut heap = Heap::new(64).unwrap();
    let initial = heap.arena_capacity();

    let handle = heap.allocate(256).unwrap();
    assert!(heap.arena_capacity() > initial);
    assert_eq!(handle.offset() % ALIGNMENT, 0);
    assert!(!heap.has_adjacent_free_blocks());
}

#[test]
fn test_conservation_across_churn() {
    let mut heap = heap();
    let a = heap.allocate(5).unwrap();
    let b = heap.allocate(11).unwrap();
    let c = heap.allocate(22).unwrap();
    let d = heap.allocate(33).unwrap();

    heap.free(b).unwrap();
    heap.free(d).unwrap();

    let live_sum: usize = heap
        .blocks()
        .filter(|block| !block.free)
        .map(|block| block.requested)
        .sum();
    assert_eq!(heap.active_bytes_allocated(), 5 + 22);
    assert_eq!(live_sum, heap.active_bytes_allocated());
    assert!(!heap.has_adjacent_free_blocks());

    heap.free(a).unwrap();
    heap.free(c).unwrap();
    assert_eq!(heap.active_bytes_allocated(), 0);
    assert_eq!(heap.count_blocks(), 0);
}

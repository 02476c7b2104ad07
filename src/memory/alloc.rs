//! Typed value allocation over the raw byte API
//!
//! Pure ergonomics: a [`ValueHandle`] is a raw handle plus a type.
//! Values are restricted to `Copy` because the arena never runs drop
//! glue; reclamation is byte-level.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr::{read_unaligned, write_unaligned};

use super::heap::{Heap, HeapError, RawHandle};
use super::store::BackingStore;

/// Handle to a value of type `T` placed in the arena
pub struct ValueHandle<T> {
    raw: RawHandle,
    _marker: PhantomData<T>,
}

impl<T> ValueHandle<T> {
    /// The underlying raw handle
    pub fn raw(&self) -> RawHandle {
        self.raw
    }
}

impl<T> Clone for ValueHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ValueHandle<T> {}

impl<T> PartialEq for ValueHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for ValueHandle<T> {}

impl<T> Debug for ValueHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ValueHandle").field(&self.raw).finish()
    }
}

impl<S: BackingStore> Heap<S> {
    /// Allocate space for a `T` and move `value` into it.
    ///
    /// Zero-sized types are rejected as [`HeapError::InvalidSize`],
    /// consistent with [`Heap::allocate`]. Payloads are 8-aligned;
    /// types with larger alignment are accessed unaligned.
    pub fn alloc_value<T: Copy>(&mut self, value: T) -> Result<ValueHandle<T>, HeapError> {
        let raw = self.allocate(size_of::<T>())?;
        let ptr = self.payload_ptr_unchecked(raw);
        // SAFETY: allocate returned a live block with capacity for
        // the aligned size of T
        unsafe { write_unaligned(ptr as *mut T, value) };
        Ok(ValueHandle {
            raw,
            _marker: PhantomData,
        })
    }

    /// Read the value a handle names.
    ///
    /// Validated against the block list: the handle must name a live
    /// allocated block with capacity for a `T`. The heap does not
    /// track types, so reading through a handle whose block was freed
    /// and re-allocated under a different type yields whatever bytes
    /// are there now.
    pub fn read_value<T: Copy>(&self, handle: &ValueHandle<T>) -> Result<T, HeapError> {
        let ptr = self.value_ptr(handle)?;
        // SAFETY: value_ptr confirmed a live block with capacity for
        // T; the payload was initialised by alloc_value or
        // write_value
        unsafe { Ok(read_unaligned(ptr as *const T)) }
    }

    /// Overwrite the value a handle names
    pub fn write_value<T: Copy>(
        &mut self,
        handle: &ValueHandle<T>,
        value: T,
    ) -> Result<(), HeapError> {
        let ptr = self.value_ptr(handle)?;
        // SAFETY: as for read_value
        unsafe { write_unaligned(ptr as *mut T, value) };
        Ok(())
    }

    /// Release the underlying block
    pub fn free_value<T>(&mut self, handle: ValueHandle<T>) -> Result<(), HeapError> {
        self.free(handle.raw)
    }

    fn value_ptr<T>(&self, handle: &ValueHandle<T>) -> Result<*mut u8, HeapError> {
        let header = self.live_block(handle.raw)?;
        if header.payload_capacity() < size_of::<T>() {
            return Err(HeapError::UnknownPointer {
                offset: handle.raw.offset(),
            });
        }
        Ok(self.payload_ptr_unchecked(handle.raw))
    }
}

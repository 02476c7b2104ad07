//! Raw memory acquired from the system allocator
//!
//! A region is a single span of uninitialised bytes. Nothing here
//! interprets the contents; the heap lays its headers over them.

use std::alloc::{alloc, dealloc, realloc, Layout};
use std::ptr::NonNull;

use thiserror::Error;

use super::header::ALIGNMENT;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// Zero-sized or unrepresentable reservation
    #[error("bad region size")]
    BadSize,
    /// The system allocator refused the request
    #[error("system allocator could not supply {0} bytes")]
    SystemOom(usize),
}

/// A span of raw bytes owned by the allocator
#[derive(Debug, PartialEq)]
pub struct Region {
    /// Pointer to memory
    ptr: NonNull<u8>,
    /// Size of the span
    size: usize,
}

impl Region {
    /// Acquire `size` bytes, aligned to [`ALIGNMENT`].
    ///
    /// `size` must be a non-zero multiple of the alignment; the
    /// backing stores round their reservations up before calling.
    pub fn new(size: usize) -> Result<Self, RegionError> {
        debug_assert!(size % ALIGNMENT == 0);
        Ok(Region {
            ptr: Self::alloc_region(size)?,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Extend the span to `new_size` bytes, possibly moving it.
    ///
    /// Contents below the old size are preserved. Anything recording
    /// positions within the region must hold offsets, not addresses.
    pub fn grow(&mut self, new_size: usize) -> Result<(), RegionError> {
        debug_assert!(new_size > self.size);
        debug_assert!(new_size % ALIGNMENT == 0);

        let layout =
            Layout::from_size_align(self.size, ALIGNMENT).map_err(|_| RegionError::BadSize)?;
        if Layout::from_size_align(new_size, ALIGNMENT).is_err() {
            return Err(RegionError::BadSize);
        }

        // SAFETY: ptr was allocated with this layout; new_size passed
        // the layout check above; the fresh tail fill stays in bounds.
        unsafe {
            let ptr = realloc(self.ptr.as_ptr(), layout, new_size);
            if ptr.is_null() {
                return Err(RegionError::SystemOom(new_size));
            }
            if cfg!(debug_assertions) {
                // Fill fresh memory with 0xff to aid debugging
                std::slice::from_raw_parts_mut(ptr.add(self.size), new_size - self.size)
                    .fill(0xff);
            }
            self.ptr = NonNull::new_unchecked(ptr);
        }
        self.size = new_size;
        Ok(())
    }

    fn alloc_region(size: usize) -> Result<NonNull<u8>, RegionError> {
        if size == 0 {
            return Err(RegionError::BadSize);
        }
        let layout = Layout::from_size_align(size, ALIGNMENT).map_err(|_| RegionError::BadSize)?;
        // SAFETY: layout is valid and non-zero; the pointer is checked
        // for null before wrapping; the debug fill stays in bounds.
        unsafe {
            let ptr = alloc(layout);
            if ptr.is_null() {
                Err(RegionError::SystemOom(size))
            } else {
                if cfg!(debug_assertions) {
                    std::slice::from_raw_parts_mut(ptr, size).fill(0xff);
                }
                Ok(NonNull::new_unchecked(ptr))
            }
        }
    }

    fn dealloc_region(ptr: NonNull<u8>, size: usize) {
        // SAFETY: ptr/size describe an allocation made by alloc_region
        // with the same constant alignment
        unsafe {
            dealloc(
                ptr.as_ptr(),
                Layout::from_size_align_unchecked(size, ALIGNMENT),
            )
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        Self::dealloc_region(self.ptr, self.size);
    }
}

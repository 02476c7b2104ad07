//! Backing stores supplying the arena bytes
//!
//! A store hands the heap one contiguous reservation and, for the
//! growable variant, extends it on demand. Stores never inspect or
//! modify the bytes they supply.

use thiserror::Error;

use super::header::align_bytes;
use super::region::{Region, RegionError};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The store was reserved once and cannot grow
    #[error("backing store is fixed-capacity and cannot grow")]
    FixedCapacity,
    /// Growth would take the arena past the configured limit
    #[error("growth to {requested} bytes exceeds the store limit of {limit}")]
    LimitReached { requested: usize, limit: usize },
    #[error(transparent)]
    Region(#[from] RegionError),
}

/// Location of bytes added by a growth call, as offsets within the
/// arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Offset of the first new byte
    pub offset: usize,
    /// Number of new bytes
    pub len: usize,
}

/// Source of raw arena bytes
///
/// `reserve` happens once, at heap construction; failure there is
/// fatal to construction. `grow` is consulted only when no free block
/// satisfies a request, and on failure must leave the arena exactly
/// as it was.
pub trait BackingStore {
    /// Acquire the initial reservation, rounded up to alignment
    fn reserve(initial: usize) -> Result<Self, StoreError>
    where
        Self: Sized;

    /// Current arena size in bytes
    fn capacity(&self) -> usize;

    /// Base address of the arena
    fn base(&self) -> *mut u8;

    /// Extend the arena by at least `additional` bytes, returning the
    /// span of new bytes
    fn grow(&mut self, additional: usize) -> Result<Span, StoreError>;
}

/// A single upfront reservation; exhaustion is terminal
pub struct FixedStore {
    region: Region,
}

impl BackingStore for FixedStore {
    fn reserve(initial: usize) -> Result<Self, StoreError> {
        Ok(FixedStore {
            region: Region::new(align_bytes(initial))?,
        })
    }

    fn capacity(&self) -> usize {
        self.region.size()
    }

    fn base(&self) -> *mut u8 {
        self.region.as_ptr()
    }

    fn grow(&mut self, _additional: usize) -> Result<Span, StoreError> {
        Err(StoreError::FixedCapacity)
    }
}

/// Reallocating store, optionally bounded by a byte limit
pub struct GrowableStore {
    region: Region,
    limit: Option<usize>,
}

impl GrowableStore {
    /// Reserve with a ceiling; growth past `limit` bytes fails with
    /// [`StoreError::LimitReached`]
    pub fn with_limit(initial: usize, limit: usize) -> Result<Self, StoreError> {
        let mut store = Self::reserve(initial)?;
        store.limit = Some(limit);
        Ok(store)
    }
}

impl BackingStore for GrowableStore {
    fn reserve(initial: usize) -> Result<Self, StoreError> {
        Ok(GrowableStore {
            region: Region::new(align_bytes(initial))?,
            limit: None,
        })
    }

    fn capacity(&self) -> usize {
        self.region.size()
    }

    fn base(&self) -> *mut u8 {
        self.region.as_ptr()
    }

    fn grow(&mut self, additional: usize) -> Result<Span, StoreError> {
        let offset = self.region.size();
        let len = align_bytes(additional);
        let new_size = offset.checked_add(len).ok_or(RegionError::BadSize)?;

        if let Some(limit) = self.limit {
            if new_size > limit {
                return Err(StoreError::LimitReached {
                    requested: new_size,
                    limit,
                });
            }
        }

        self.region.grow(new_size)?;
        Ok(Span { offset, len })
    }
}

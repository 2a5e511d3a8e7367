// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Memory that stays shared after `fork()`.
//!
//! A `SharedRegion` is an anonymous `MAP_SHARED` mapping.  Threads see
//! it like any other heap allocation; forked worker processes inherit
//! the mapping, so a store made by a child is visible to the parent
//! and vice versa.  The region never grows or shrinks after it has
//! been created.
//!
//! The region does no locking of its own.  Callers coordinate through
//! the atomics of the worker synchronizer, which is why the raw
//! accessors are `unsafe`.

use std::io;
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};
use std::slice;

use crate::error::{PoolError, Result};

/// A fixed-length array of `T` living in process-shared memory.
pub struct SharedRegion<T> {
    ptr: NonNull<T>,
    len: usize,
    bytes: usize,
    _marker: PhantomData<T>,
}

// The region hands out raw access only; the synchronizer protocol is
// what keeps concurrent users apart.
unsafe impl<T: Send + Sync> Send for SharedRegion<T> {}
unsafe impl<T: Send + Sync> Sync for SharedRegion<T> {}

impl<T> SharedRegion<T> {
    /// Map a region for `len` elements, initializing element `i` with
    /// `init(i)`.  Zero-length regions do not touch the kernel.
    pub fn new<F>(len: usize, mut init: F) -> Result<Self>
    where
        F: FnMut(usize) -> T,
    {
        let bytes = len
            .checked_mul(mem::size_of::<T>())
            .ok_or_else(|| PoolError::TooLarge {
                what: "shared region",
                count: len,
                size: mem::size_of::<T>(),
            })?;
        let ptr = if bytes == 0 {
            NonNull::dangling()
        } else {
            // Anonymous mappings are page aligned, which covers any T we store.
            let raw = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    bytes,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if raw == libc::MAP_FAILED {
                return Err(PoolError::SharedMemory {
                    bytes,
                    source: io::Error::last_os_error(),
                });
            }
            NonNull::new(raw as *mut T).ok_or_else(|| PoolError::SharedMemory {
                bytes,
                source: io::Error::new(io::ErrorKind::Other, "mmap returned null"),
            })?
        };

        for i in 0..len {
            unsafe { ptr::write(ptr.as_ptr().add(i), init(i)) };
        }

        Ok(SharedRegion {
            ptr,
            len,
            bytes,
            _marker: PhantomData,
        })
    }

    /// Number of elements in the region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the region holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the whole region.
    ///
    /// # Safety
    ///
    /// No one may write to the region for as long as the slice lives.
    pub unsafe fn as_slice(&self) -> &[T] {
        slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }

    /// Mutable view of `start..start + len`.
    ///
    /// # Safety
    ///
    /// The caller must be the only reader or writer of those elements
    /// for as long as the slice lives.  Panics if the span is out of
    /// bounds.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, start: usize, len: usize) -> &mut [T] {
        assert!(
            start.checked_add(len).map_or(false, |end| end <= self.len),
            "span {}+{} outside region of {}",
            start,
            len,
            self.len
        );
        slice::from_raw_parts_mut(self.ptr.as_ptr().add(start), len)
    }
}

impl<T> SharedRegion<T>
where
    T: Sync,
{
    /// Shared reference to a single element.  Only meaningful for types
    /// that are safe to share, such as atomics.
    pub fn get(&self, index: usize) -> &T {
        assert!(index < self.len, "index {} outside region of {}", index, self.len);
        unsafe { &*self.ptr.as_ptr().add(index) }
    }
}

impl<T> Drop for SharedRegion<T> {
    fn drop(&mut self) {
        if self.bytes == 0 {
            return;
        }
        unsafe {
            ptr::drop_in_place(slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len));
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.bytes);
        }
    }
}

use std::{ptr::NonNull, slice};

use nix::{errno::Errno, libc};
use tracing::trace;

use crate::error::{Error, Result};

/// A [NativeMemory] region is a block of zeroed memory allocated with `calloc(3)` outside of the
/// rust allocator, exclusively owned by a single direct [super::ByteBuffer]. The region never
/// moves, which is what lets the socket channels hand its address straight to the kernel.
///
/// The memory is released with `free(3)` exactly once, on the first call to
/// [NativeMemory::release] or on drop.
#[derive(Debug)]
pub(crate) struct NativeMemory {
    ptr: Option<NonNull<u8>>,
    len: usize,
}

impl NativeMemory {
    pub(crate) fn allocate(len: usize) -> Result<NativeMemory> {
        if len > isize::MAX as usize {
            return Err(Error::argument(format!(
                "capacity is too large for a native allocation: {}",
                len
            )));
        }

        // Zero sized regions never touch the allocator.
        if len == 0 {
            return Ok(NativeMemory {
                ptr: Some(NonNull::dangling()),
                len,
            });
        }

        let ptr = unsafe { libc::calloc(len, 1) } as *mut u8;
        let ptr = NonNull::new(ptr).ok_or(Error::system("calloc", Errno::ENOMEM))?;
        trace!(len, "allocated native memory");

        Ok(NativeMemory {
            ptr: Some(ptr),
            len,
        })
    }

    pub(crate) fn is_released(&self) -> bool {
        self.ptr.is_none()
    }

    pub(crate) fn as_slice(&self) -> Result<&[u8]> {
        let ptr = self.ptr.ok_or(Error::State("native buffer already released"))?;
        // SAFETY: The pointer is valid for `len` bytes until released, and release requires a
        // mutable borrow so no outstanding slice can observe it.
        Ok(unsafe { slice::from_raw_parts(ptr.as_ptr(), self.len) })
    }

    pub(crate) fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        let ptr = self.ptr.ok_or(Error::State("native buffer already released"))?;
        // SAFETY: See as_slice, additionally the mutable borrow of self guarantees exclusivity.
        Ok(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), self.len) })
    }

    pub(crate) fn release(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            if self.len > 0 {
                trace!(len = self.len, "releasing native memory");
                unsafe { libc::free(ptr.as_ptr() as *mut libc::c_void) };
            }
        }
    }
}

impl Drop for NativeMemory {
    fn drop(&mut self) {
        self.release();
    }
}

// SAFETY: The region is uniquely owned by this struct and never aliased, so moving it to another
// thread is no different than moving a Box<[u8]>.
unsafe impl Send for NativeMemory {}

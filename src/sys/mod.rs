//! The [self] module holds the small set of OS level building blocks the rest of the crate is
//! built on:
//! - [DescriptorHolder] which owns exactly one descriptor, allocating it lazily and releasing it
//! exactly once.
//! - [EventFd] which wraps a kernel counter object used to interrupt a blocked
//! [crate::selector::EPollSelector::wait] call.
//! - [Waker] which is a cross thread handle onto a selector's [EventFd].

mod descriptor;
mod eventfd;

pub use descriptor::DescriptorHolder;
pub use eventfd::{EventFd, Waker};

use nix::libc;

use crate::error::{Error, Result};

/// Convert the return value of a raw libc call into a [Result], mapping `-1` onto a
/// [Error::SystemCall] carrying the current errno.
pub(crate) fn cvt(ret: libc::c_int, call: &'static str) -> Result<libc::c_int> {
    if ret == -1 {
        Err(Error::last(call))
    } else {
        Ok(ret)
    }
}

/// Same as [cvt] but for the `ssize_t` returning calls like `read(2)` and `write(2)`.
pub(crate) fn cvt_size(ret: libc::ssize_t, call: &'static str) -> Result<usize> {
    if ret < 0 {
        Err(Error::last(call))
    } else {
        Ok(ret as usize)
    }
}

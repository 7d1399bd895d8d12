use std::{
    mem::size_of,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};

use nix::{errno::Errno, libc};
use tracing::trace;

use super::{cvt, cvt_size};
use crate::error::{Error, Result};

/// An [EventFd] wraps a non-blocking linux `eventfd(2)` counter. Signalling increments the kernel
/// counter which makes the descriptor readable, and draining reads and resets it. Since the state
/// lives in the kernel a signal can never be lost, even if it happens before anyone waits on it.
#[derive(Debug)]
pub struct EventFd {
    fd: Option<OwnedFd>,
}

impl EventFd {
    /// Create a new non-blocking, close-on-exec [EventFd] with a zeroed counter.
    pub fn new() -> Result<EventFd> {
        let fd = cvt(
            unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) },
            "eventfd",
        )?;

        // SAFETY: The descriptor was just returned by eventfd(2) and nothing else references it.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(EventFd { fd: Some(fd) })
    }

    /// Return the underlying descriptor, or a [Error::State] once released.
    pub fn fd(&self) -> Result<RawFd> {
        self.owned().map(AsRawFd::as_raw_fd)
    }

    fn owned(&self) -> Result<&OwnedFd> {
        self.fd.as_ref().ok_or(Error::State("eventfd already released"))
    }

    /// Increment the counter, waking anyone blocked on the descriptor.
    pub fn signal(&self) -> Result<()> {
        signal(self.fd()?)
    }

    /// Read and reset the counter, returning whether it was non-zero. An empty counter is not an
    /// error, it simply yields `false`.
    pub fn drain(&self) -> Result<bool> {
        let fd = self.fd()?;
        let mut value: u64 = 0;
        let ret = unsafe {
            libc::read(
                fd,
                &mut value as *mut u64 as *mut libc::c_void,
                size_of::<u64>(),
            )
        };

        match cvt_size(ret, "read(eventfd)") {
            Ok(_) => {
                trace!(fd, value, "drained eventfd");
                Ok(value > 0)
            }
            Err(Error::SystemCall {
                errno: Errno::EAGAIN,
                ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create a [Waker] that signals this same counter, but owns its own duplicate of the
    /// descriptor so it can be moved to other threads.
    pub fn waker(&self) -> Result<Waker> {
        let fd = self.owned()?.try_clone().map_err(|e| {
            let errno = Errno::from_raw(e.raw_os_error().unwrap_or(0));
            Error::system("dup(eventfd)", errno)
        })?;
        Ok(Waker { fd })
    }

    /// Release the descriptor. Calling this more than once is a no-op.
    pub fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            trace!(fd = fd.as_raw_fd(), "closing eventfd");
        }
    }

    /// Whether or not [EventFd::close] has been called.
    pub fn is_closed(&self) -> bool {
        self.fd.is_none()
    }
}

/// A [Waker] is a thread safe handle used to interrupt a [crate::selector::EPollSelector] that is
/// blocked in [crate::selector::EPollSelector::wait] from another thread.
#[derive(Debug)]
pub struct Waker {
    fd: OwnedFd,
}

impl Waker {
    /// Wake the associated selector. If the selector is not currently blocked the wakeup is
    /// remembered by the kernel and the next wait returns immediately.
    pub fn wake(&self) -> Result<()> {
        signal(self.fd.as_raw_fd())
    }
}

fn signal(fd: RawFd) -> Result<()> {
    let value: u64 = 1;
    let ret = unsafe {
        libc::write(
            fd,
            &value as *const u64 as *const libc::c_void,
            size_of::<u64>(),
        )
    };

    match cvt_size(ret, "write(eventfd)") {
        Ok(_) => Ok(()),
        // The counter is saturated, which means a wakeup is already pending.
        Err(Error::SystemCall {
            errno: Errno::EAGAIN,
            ..
        }) => Ok(()),
        Err(e) => Err(e),
    }
}

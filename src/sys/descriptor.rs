use std::{
    fmt,
    os::fd::{AsRawFd, OwnedFd, RawFd},
};

use tracing::debug;

use crate::error::{Error, Result};

enum Slot<D> {
    Unallocated,
    Owned(D),
    Closed,
}

/// A [DescriptorHolder] owns exactly one OS descriptor of type `D`. The descriptor is allocated
/// lazily on first demand via [DescriptorHolder::get_or_acquire] and released exactly once, either
/// via [DescriptorHolder::close] or when the holder is dropped.
///
/// Releasing the descriptor is simply dropping the `D`, which for the default [OwnedFd] means
/// calling `close(2)`. Nothing else in the crate is allowed to close a descriptor owned here.
pub struct DescriptorHolder<D: AsRawFd = OwnedFd> {
    slot: Slot<D>,
}

impl<D: AsRawFd> DescriptorHolder<D> {
    /// Create a new holder with no descriptor yet.
    pub fn new() -> DescriptorHolder<D> {
        DescriptorHolder {
            slot: Slot::Unallocated,
        }
    }

    /// Create a holder that already owns the given descriptor, for example one returned by
    /// `accept(2)`.
    pub fn from_descriptor(fd: D) -> DescriptorHolder<D> {
        DescriptorHolder {
            slot: Slot::Owned(fd),
        }
    }

    /// Whether or not this holder currently owns a live descriptor.
    pub fn has_descriptor(&self) -> bool {
        matches!(self.slot, Slot::Owned(..))
    }

    /// Whether or not [DescriptorHolder::close] has been called.
    pub fn is_closed(&self) -> bool {
        matches!(self.slot, Slot::Closed)
    }

    /// Return the owned raw descriptor, or a [Error::State] if it was never acquired or has
    /// already been closed.
    pub fn fd(&self) -> Result<RawFd> {
        self.get().map(AsRawFd::as_raw_fd)
    }

    /// Return a reference to the owned descriptor, see [DescriptorHolder::fd] for failure modes.
    pub fn get(&self) -> Result<&D> {
        match self.slot {
            Slot::Owned(ref fd) => Ok(fd),
            Slot::Unallocated | Slot::Closed => Err(Error::State("no descriptor")),
        }
    }

    /// Return the owned descriptor, invoking `provider` to acquire it first if this is the first
    /// demand. The provider is never called again once it has succeeded. Acquiring after close is
    /// a [Error::State].
    pub fn get_or_acquire<F>(&mut self, provider: F) -> Result<RawFd>
    where
        F: FnOnce() -> Result<D>,
    {
        if let Slot::Unallocated = self.slot {
            let fd = provider()?;
            debug!(fd = fd.as_raw_fd(), "acquired descriptor");
            self.slot = Slot::Owned(fd);
        }
        self.fd()
    }

    /// Release the owned descriptor. Calling this more than once, or on a holder that never
    /// acquired a descriptor, is a no-op.
    pub fn close(&mut self) {
        if let Slot::Owned(fd) = std::mem::replace(&mut self.slot, Slot::Closed) {
            debug!(fd = fd.as_raw_fd(), "releasing descriptor");
            drop(fd);
        }
    }
}

impl<D: AsRawFd> Default for DescriptorHolder<D> {
    fn default() -> Self {
        DescriptorHolder::new()
    }
}

impl<D: AsRawFd> fmt::Debug for DescriptorHolder<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.slot {
            Slot::Unallocated => "unallocated".to_string(),
            Slot::Owned(ref fd) => fd.as_raw_fd().to_string(),
            Slot::Closed => "closed".to_string(),
        };
        f.debug_struct("DescriptorHolder")
            .field("fd", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;

    struct CountingFd {
        fd: RawFd,
        releases: Rc<Cell<usize>>,
    }

    impl AsRawFd for CountingFd {
        fn as_raw_fd(&self) -> RawFd {
            self.fd
        }
    }

    impl Drop for CountingFd {
        fn drop(&mut self) {
            self.releases.set(self.releases.get() + 1);
        }
    }

    #[test]
    fn close_twice_releases_once() {
        let releases = Rc::new(Cell::new(0));
        let mut holder = DescriptorHolder::new();

        let counter = releases.clone();
        let fd = holder
            .get_or_acquire(|| {
                Ok(CountingFd {
                    fd: 42,
                    releases: counter,
                })
            })
            .unwrap();
        assert_eq!(fd, 42);

        holder.close();
        holder.close();
        assert_eq!(releases.get(), 1);

        drop(holder);
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn provider_is_memoized() {
        let releases = Rc::new(Cell::new(0));
        let calls = Cell::new(0);
        let mut holder = DescriptorHolder::new();

        for _ in 0..3 {
            let fd = holder
                .get_or_acquire(|| {
                    calls.set(calls.get() + 1);
                    Ok(CountingFd {
                        fd: 7,
                        releases: releases.clone(),
                    })
                })
                .unwrap();
            assert_eq!(fd, 7);
        }
        assert_eq!(calls.get(), 1);
        assert!(holder.has_descriptor());
    }

    #[test]
    fn access_before_acquire_and_after_close_fails() {
        let mut holder = DescriptorHolder::<CountingFd>::new();
        assert!(matches!(holder.fd(), Err(Error::State(..))));

        holder.close();
        assert!(holder.is_closed());

        let result = holder.get_or_acquire(|| panic!("provider must not run after close"));
        assert!(matches!(result, Err(Error::State(..))));
    }

    #[test]
    fn failed_provider_leaves_holder_unallocated() {
        let mut holder = DescriptorHolder::<CountingFd>::new();
        let result = holder.get_or_acquire(|| Err(Error::State("boom")));
        assert!(result.is_err());
        assert!(!holder.has_descriptor());
        assert!(!holder.is_closed());
    }

    #[test]
    fn drop_releases_owned_descriptor() {
        let releases = Rc::new(Cell::new(0));
        let holder = DescriptorHolder::from_descriptor(CountingFd {
            fd: 3,
            releases: releases.clone(),
        });
        assert_eq!(holder.fd().unwrap(), 3);
        drop(holder);
        assert_eq!(releases.get(), 1);
    }
}

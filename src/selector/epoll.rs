use std::{
    collections::HashMap,
    fmt,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};

use nix::{errno::Errno, libc};
use slab::Slab;
use tracing::{debug, trace, warn};

use super::{SelectionKey, SelectorBuilder, OP_READ};
use crate::{
    error::{Error, Result},
    sys::{cvt, EventFd, Waker},
};

/// Reserved epoll token for the internal wakeup [EventFd], slab indices never reach it.
const WAKEUP_TOKEN: u64 = u64::MAX;

/// The [EPollSelector] is a single threaded readiness reactor on top of `epoll(7)`, see the
/// [module level](super) documentation for the overall flow.
///
/// Each registered descriptor is tracked by a [SelectionKey] stored in a [Slab], whose index is
/// the token handed to the kernel. Keys carry an optional attachment of type `A` that is owned by
/// the caller and never inspected here.
///
/// Only [EPollSelector::wakeup] and [Waker::wake] may be used to interact with a selector from a
/// thread other than the one driving it.
pub struct EPollSelector<A = ()> {
    epfd: Option<OwnedFd>,
    wakeup: EventFd,
    events: Vec<libc::epoll_event>,
    keys: Slab<SelectionKey<A>>,
    tokens: HashMap<RawFd, usize>,
    selected: Vec<usize>,
    closed: bool,
}

impl<A> EPollSelector<A> {
    /// Create a new selector with the default [SelectorBuilder] configuration.
    pub fn new() -> Result<EPollSelector<A>> {
        SelectorBuilder::new().build()
    }

    pub(super) fn with_config(config: &SelectorBuilder) -> Result<EPollSelector<A>> {
        let events = vec![libc::epoll_event { events: 0, u64: 0 }; config.max_events];

        Ok(EPollSelector {
            epfd: None,
            wakeup: EventFd::new()?,
            events,
            keys: Slab::with_capacity(1024),
            tokens: HashMap::with_capacity(1024),
            selected: Vec::with_capacity(1024),
            closed: false,
        })
    }

    /// Create the epoll instance and register the internal wakeup descriptor. This must be called
    /// exactly once before any other operation.
    pub fn start(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::State("selector is closed"));
        }
        if self.epfd.is_some() {
            return Err(Error::State("selector already started"));
        }

        let epfd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) }, "epoll_create")?;
        // SAFETY: The descriptor was just returned by epoll_create1 and nothing else owns it.
        let epfd = unsafe { OwnedFd::from_raw_fd(epfd) };

        ctl(
            epfd.as_raw_fd(),
            libc::EPOLL_CTL_ADD,
            self.wakeup.fd()?,
            OP_READ,
            WAKEUP_TOKEN,
            "epoll_ctl(eventfd)",
        )?;

        debug!(epfd = epfd.as_raw_fd(), max_events = self.events.len(), "selector started");
        self.epfd = Some(epfd);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.epfd.is_some()
    }

    fn epfd(&self) -> Result<RawFd> {
        match self.epfd {
            Some(ref fd) => Ok(fd.as_raw_fd()),
            None if self.closed => Err(Error::State("selector is closed")),
            None => Err(Error::State("selector not started")),
        }
    }

    /// Register interest in `ops` for `fd`, creating its key on first call and updating it on
    /// later calls. Either way the key's ready mask is reset to zero.
    pub fn interest(&mut self, fd: RawFd, ops: u32) -> Result<&mut SelectionKey<A>> {
        let epfd = self.epfd()?;

        let token = match self.tokens.get(&fd).copied() {
            Some(token) => {
                ctl(epfd, libc::EPOLL_CTL_MOD, fd, ops, token as u64, "epoll_ctl")?;
                self.keys[token].rearm(ops);
                token
            }
            None => {
                let entry = self.keys.vacant_entry();
                let token = entry.key();
                ctl(epfd, libc::EPOLL_CTL_ADD, fd, ops, token as u64, "epoll_ctl")?;
                entry.insert(SelectionKey::new(fd, ops));
                self.tokens.insert(fd, token);
                token
            }
        };

        trace!(fd, token, ops, "interest");
        Ok(&mut self.keys[token])
    }

    /// Remove the key for `fd` from the selector and the kernel, returning it so the caller can
    /// recover its attachment. Cancelling an unknown descriptor is a no-op.
    ///
    /// A descriptor closed before it was cancelled has already left the kernel's interest list,
    /// which is not treated as an error.
    pub fn cancel(&mut self, fd: RawFd) -> Result<Option<SelectionKey<A>>> {
        let token = match self.tokens.remove(&fd) {
            Some(token) => token,
            None => return Ok(None),
        };
        let key = self.keys.remove(token);
        self.selected.retain(|selected| *selected != token);

        let epfd = self.epfd()?;
        match ctl(epfd, libc::EPOLL_CTL_DEL, fd, 0, token as u64, "epoll_ctl") {
            Ok(()) => {}
            Err(Error::SystemCall {
                errno: Errno::EBADF | Errno::ENOENT,
                ..
            }) => trace!(fd, "descriptor already left the interest list"),
            Err(e) => return Err(e),
        }

        trace!(fd, token, "cancelled");
        Ok(Some(key))
    }

    /// Block until at least one registered descriptor is ready or `timeout_millis` elapses, with
    /// `-1` meaning no timeout. Returns the number of events the kernel reported, which includes
    /// a wakeup event if one was consumed.
    ///
    /// The keys that became ready are available via [EPollSelector::selected] until the next call.
    pub fn wait(&mut self, timeout_millis: i32) -> Result<usize> {
        self.selected.clear();
        let epfd = self.epfd()?;

        let ret = unsafe {
            libc::epoll_wait(
                epfd,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_millis,
            )
        };
        let count = cvt(ret, "epoll_wait")? as usize;

        for i in 0..count {
            // Copy the fields out, epoll_event is packed on some targets.
            let event = self.events[i];
            let (token, ready) = (event.u64, event.events);

            if token == WAKEUP_TOKEN {
                self.wakeup.drain()?;
                trace!("consumed wakeup");
                continue;
            }

            match self.keys.get_mut(token as usize) {
                Some(key) => {
                    key.mark_ready(ready);
                    self.selected.push(token as usize);
                }
                None => warn!(token, ready, "no key found for event"),
            }
        }

        trace!(count, selected = self.selected.len(), "wait returned");
        Ok(count)
    }

    /// The keys that became ready during the last [EPollSelector::wait].
    pub fn selected(&self) -> impl Iterator<Item = &SelectionKey<A>> + '_ {
        self.selected.iter().filter_map(|token| self.keys.get(*token))
    }

    /// The descriptors of [EPollSelector::selected], handy for dispatching while mutating keys.
    pub fn selected_fds(&self) -> Vec<RawFd> {
        self.selected().map(SelectionKey::fd).collect()
    }

    /// Whether `fd` became ready during the last [EPollSelector::wait].
    pub fn is_selected(&self, fd: RawFd) -> bool {
        self.tokens
            .get(&fd)
            .map_or(false, |token| self.selected.contains(token))
    }

    pub fn key(&self, fd: RawFd) -> Option<&SelectionKey<A>> {
        self.tokens.get(&fd).and_then(|token| self.keys.get(*token))
    }

    pub fn key_mut(&mut self, fd: RawFd) -> Option<&mut SelectionKey<A>> {
        let token = *self.tokens.get(&fd)?;
        self.keys.get_mut(token)
    }

    /// The number of registered keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Interrupt a blocked [EPollSelector::wait]. The wakeup is consumed internally and never
    /// shows up in [EPollSelector::selected].
    pub fn wakeup(&self) -> Result<()> {
        self.wakeup.signal()
    }

    /// Create a [Waker] that can be moved to another thread to interrupt this selector.
    pub fn waker(&self) -> Result<Waker> {
        self.wakeup.waker()
    }

    /// Signal any blocked waiter, then release the event array, the epoll instance and the wakeup
    /// descriptor and forget all keys. Calling this more than once is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.wakeup.signal() {
            debug!(error = %e, "failed to signal wakeup on close");
        }

        self.events = Vec::new();
        if let Some(epfd) = self.epfd.take() {
            debug!(epfd = epfd.as_raw_fd(), "selector closed");
        }
        self.wakeup.close();

        self.keys.clear();
        self.tokens.clear();
        self.selected.clear();
    }
}

impl<A> Drop for EPollSelector<A> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<A> fmt::Debug for EPollSelector<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EPollSelector")
            .field("epfd", &self.epfd)
            .field("keys", &self.keys.len())
            .field("selected", &self.selected.len())
            .field("closed", &self.closed)
            .finish()
    }
}

fn ctl(
    epfd: RawFd,
    op: libc::c_int,
    fd: RawFd,
    events: u32,
    token: u64,
    call: &'static str,
) -> Result<()> {
    let mut event = libc::epoll_event { events, u64: token };
    cvt(unsafe { libc::epoll_ctl(epfd, op, fd, &mut event) }, call)?;
    Ok(())
}

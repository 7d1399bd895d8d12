use std::{fmt, os::fd::RawFd};

use super::{OP_READ, OP_WRITE};

/// A [SelectionKey] identifies one descriptor registered with an [super::EPollSelector]. It
/// carries the interest mask the caller asked for, the ready mask accumulated by
/// [super::EPollSelector::wait] and an optional caller owned attachment which the selector never
/// looks at.
///
/// Ready bits accumulate across waits, they are only reset when
/// [super::EPollSelector::interest] is called again for the same descriptor.
pub struct SelectionKey<A> {
    fd: RawFd,
    interest_ops: u32,
    ready_ops: u32,
    attachment: Option<A>,
}

impl<A> SelectionKey<A> {
    pub(super) fn new(fd: RawFd, interest_ops: u32) -> SelectionKey<A> {
        SelectionKey {
            fd,
            interest_ops,
            ready_ops: 0,
            attachment: None,
        }
    }

    pub(super) fn rearm(&mut self, interest_ops: u32) {
        self.interest_ops = interest_ops;
        self.ready_ops = 0;
    }

    pub(super) fn mark_ready(&mut self, ops: u32) {
        self.ready_ops |= ops;
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn interest_ops(&self) -> u32 {
        self.interest_ops
    }

    pub fn ready_ops(&self) -> u32 {
        self.ready_ops
    }

    pub fn is_readable(&self) -> bool {
        self.ready_ops & OP_READ != 0
    }

    pub fn is_writable(&self) -> bool {
        self.ready_ops & OP_WRITE != 0
    }

    pub fn attachment(&self) -> Option<&A> {
        self.attachment.as_ref()
    }

    pub fn attachment_mut(&mut self) -> Option<&mut A> {
        self.attachment.as_mut()
    }

    /// Attach a value to this key, returning the previous attachment if any.
    pub fn attach(&mut self, attachment: A) -> Option<A> {
        self.attachment.replace(attachment)
    }

    /// Remove and return the attachment.
    pub fn detach(&mut self) -> Option<A> {
        self.attachment.take()
    }

    /// Consume the key and return its attachment.
    pub fn into_attachment(self) -> Option<A> {
        self.attachment
    }
}

impl<A> fmt::Debug for SelectionKey<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionKey")
            .field("fd", &self.fd)
            .field("interest_ops", &format_args!("{:#x}", self.interest_ops))
            .field("ready_ops", &format_args!("{:#x}", self.ready_ops))
            .field("attached", &self.attachment.is_some())
            .finish()
    }
}

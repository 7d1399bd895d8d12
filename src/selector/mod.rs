//! The [self] module contains the readiness based event loop primitive, the [EPollSelector]. It
//! owns a single `epoll(7)` instance along with an [crate::sys::EventFd] used purely to interrupt
//! a blocked [EPollSelector::wait], and tracks a [SelectionKey] per registered descriptor.
//!
//! The flow is simple, the driving loop registers descriptors via [EPollSelector::interest],
//! blocks in [EPollSelector::wait], then walks [EPollSelector::selected] and performs the
//! non-blocking channel operations for each ready key. Registrations are level triggered.
//!
//! The readiness masks are the kernel's `EPOLL*` bits passed through unchanged, the most common
//! ones are re-exported here as [OP_READ], [OP_WRITE], [OP_ERROR], [OP_HANGUP] and
//! [OP_READ_HANGUP].

mod builder;
mod epoll;
mod key;

pub use builder::SelectorBuilder;
pub use epoll::EPollSelector;
pub use key::SelectionKey;

use nix::libc;

pub const OP_READ: u32 = libc::EPOLLIN as u32;
pub const OP_WRITE: u32 = libc::EPOLLOUT as u32;
pub const OP_ERROR: u32 = libc::EPOLLERR as u32;
pub const OP_HANGUP: u32 = libc::EPOLLHUP as u32;
pub const OP_READ_HANGUP: u32 = libc::EPOLLRDHUP as u32;

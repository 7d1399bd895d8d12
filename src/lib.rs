//! # libnio
//!
//! This is a small, single threaded, readiness based networking toolkit for linux built directly
//! on top of `epoll(7)`. The package is split up into a handful of modules each handling a
//! specific subset of the functionality needed:
//! - [buffer] holds the [ByteBuffer], a fixed capacity cursor over either heap or native memory.
//! - [sys] holds the descriptor ownership and wakeup primitives.
//! - [selector] holds the [EPollSelector] event loop primitive and its [SelectionKey]s.
//! - [net] holds the IPv4/IPv6 address types, host name resolution and the TCP channels.
//!
//! For complete programs see the `demos` directory in the root of this repository.
//!
//! At a high level a driving loop for a TCP echo server looks like this:
//!
//! ```no_run
//! use std::{collections::HashMap, os::fd::AsRawFd};
//!
//! use libnio::net::{ReadOutcome, ReadableByteChannel, ServerSocketChannel, SocketChannel, WritableByteChannel};
//! use libnio::selector::{OP_READ, OP_WRITE};
//! use libnio::{ByteBuffer, EPollSelector};
//!
//! fn main() -> libnio::Result<()> {
//!     let mut selector: EPollSelector = EPollSelector::new()?;
//!     selector.start()?;
//!
//!     // Listen on 0.0.0.0:9091 with the default backlog, and never block on accept.
//!     let mut server = ServerSocketChannel::new();
//!     server.configure_blocking(false)?;
//!     server.bind(9091)?;
//!     selector.interest(server.fd()?, OP_READ)?;
//!
//!     // Each connection carries its buffer and whether it is currently echoing back.
//!     let mut conns: HashMap<i32, (SocketChannel, ByteBuffer, bool)> = HashMap::new();
//!     loop {
//!         selector.wait(-1)?;
//!         for fd in selector.selected_fds() {
//!             if fd == server.as_raw_fd() {
//!                 while let Some(conn) = server.accept()? {
//!                     selector.interest(conn.fd()?, OP_READ)?;
//!                     conns.insert(conn.fd()?, (conn, ByteBuffer::allocate_direct(4096)?, false));
//!                 }
//!                 continue;
//!             }
//!
//!             let (conn, buf, writing) = match conns.get_mut(&fd) {
//!                 Some(entry) => entry,
//!                 None => continue,
//!             };
//!
//!             // Writes may be partial, keep going on writability until the buffer drains.
//!             if *writing {
//!                 conn.write(buf)?;
//!                 if !buf.has_remaining() {
//!                     buf.clear();
//!                     *writing = false;
//!                     selector.interest(fd, OP_READ)?;
//!                 }
//!                 continue;
//!             }
//!
//!             match conn.read(buf)? {
//!                 ReadOutcome::EndOfStream => {
//!                     selector.cancel(fd)?;
//!                     conns.remove(&fd);
//!                 }
//!                 ReadOutcome::WouldBlock => {}
//!                 ReadOutcome::Read(_) => {
//!                     buf.flip();
//!                     *writing = true;
//!                     selector.interest(fd, OP_WRITE)?;
//!                 }
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! None of the channel operations block once configured non-blocking, would-block conditions
//! come back as ordinary values while real failures are reported as an [Error].

pub mod buffer;
pub mod error;
pub mod net;
pub mod selector;
pub mod sys;

pub use buffer::ByteBuffer;
pub use error::{Error, Result};
pub use selector::{EPollSelector, SelectionKey, SelectorBuilder};

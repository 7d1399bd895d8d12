//! The [self] package handles all logic relating to creating and managing non-blocking network IO
//! objects and the addresses they talk to.
//!
//! This module primarily exposes the following objects:
//! - [ServerSocketChannel] which represents a listening TCP socket.
//! - [SocketChannel] which represents a bi-directional TCP stream.
//! - [InetAddress] and [InetSocketAddress] which handle IPv4/IPv6 parsing, formatting and
//! host name resolution.
//!
//! Channels move bytes through [crate::buffer::ByteBuffer]s. Direct buffers are handed to the
//! kernel as is, heap buffers are staged through a per channel native scratch buffer. None of the
//! channel operations ever block once the channel is configured non-blocking, would-block
//! conditions are reported as ordinary return values, see [ReadOutcome].

mod addr;
mod channel;
mod inet;
mod listener;
mod socket;
mod stream;

pub use addr::InetSocketAddress;
pub use channel::{Channel, ReadOutcome, ReadableByteChannel, SocketChannelBase, WritableByteChannel};
pub use inet::{Inet4Address, Inet6Address, InetAddress};
pub use listener::ServerSocketChannel;
pub use stream::SocketChannel;

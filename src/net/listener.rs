use std::{
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    ptr,
};

use nix::{
    errno::Errno,
    libc,
    sys::socket::{listen, setsockopt, sockopt, Backlog},
};
use tracing::debug;

use super::{
    addr::getsockname, socket, Channel, InetSocketAddress, SocketChannel, SocketChannelBase,
};
use crate::{
    error::{Error, Result},
    sys::cvt,
};

/// A [ServerSocketChannel] represents a listening TCP socket that hands out [SocketChannel]s for
/// incoming connections.
///
/// # Examples
///
/// ```no_run
/// # use libnio::net::ServerSocketChannel;
/// # fn main() -> libnio::Result<()> {
/// let mut server = ServerSocketChannel::new();
/// server.configure_blocking(false)?;
/// server.bind(9092)?;
///
/// while let Some(mut client) = server.accept()? {
///     // Register the client with a selector and go from there.
///     # let _ = &mut client;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ServerSocketChannel {
    base: SocketChannelBase,
    reuse_address: bool,
}

impl ServerSocketChannel {
    /// The listen backlog used by [ServerSocketChannel::bind].
    pub const DEFAULT_BACKLOG: i32 = 1024;

    pub fn new() -> ServerSocketChannel {
        ServerSocketChannel {
            base: SocketChannelBase::new(),
            reuse_address: true,
        }
    }

    /// The channel's descriptor, or [Error::State] if it is not bound yet or already closed.
    pub fn fd(&self) -> Result<RawFd> {
        self.base.fd()
    }

    pub fn is_blocking(&self) -> bool {
        self.base.is_blocking()
    }

    /// See [SocketChannelBase::configure_blocking]. Accepted channels start out in the same mode.
    pub fn configure_blocking(&mut self, blocking: bool) -> Result<()> {
        self.base.configure_blocking(blocking)
    }

    /// Whether to set `SO_REUSEADDR` before binding, defaults to `true`.
    pub fn set_reuse_address(&mut self, reuse: bool) {
        self.reuse_address = reuse;
    }

    /// Bind to the wildcard address on `port` and start listening with the
    /// [ServerSocketChannel::DEFAULT_BACKLOG]. A port of zero picks an ephemeral port, see
    /// [ServerSocketChannel::local_addr].
    pub fn bind(&mut self, port: u16) -> Result<()> {
        let resolved = InetSocketAddress::loopback(port);
        let wildcard = InetSocketAddress::new(resolved.address().unspecified_like(), port);
        self.bind_addr(&wildcard, Self::DEFAULT_BACKLOG)
    }

    /// Bind to exactly `address` and start listening with the given backlog.
    pub fn bind_addr(&mut self, address: &InetSocketAddress, backlog: i32) -> Result<()> {
        self.base.acquire(socket::family_of(address))?;
        let fd = self.base.owned()?;

        if self.reuse_address {
            setsockopt(fd, sockopt::ReuseAddr, &true)
                .map_err(|e| Error::system("setsockopt(SO_REUSEADDR)", e))?;
        }

        let (addr, addr_len) = address.to_native();
        cvt(
            unsafe { libc::bind(fd.as_raw_fd(), addr.as_ptr(), addr_len) },
            "bind",
        )?;

        let backlog = Backlog::new(backlog).map_err(|e| Error::system("listen", e))?;
        listen(fd, backlog).map_err(|e| Error::system("listen", e))?;

        debug!(fd = fd.as_raw_fd(), %address, "listening");
        Ok(())
    }

    /// Accept a pending connection. Returns [None] when no connection is pending on a non-blocking
    /// channel.
    pub fn accept(&mut self) -> Result<Option<SocketChannel>> {
        let fd = self.base.fd()?;
        let blocking = self.base.is_blocking();

        let mut flags = libc::SOCK_CLOEXEC;
        if !blocking {
            flags |= libc::SOCK_NONBLOCK;
        }

        let ret = unsafe { libc::accept4(fd, ptr::null_mut(), ptr::null_mut(), flags) };
        if ret >= 0 {
            // SAFETY: accept4 just handed us this descriptor, nothing else owns it.
            let client = unsafe { OwnedFd::from_raw_fd(ret) };
            debug!(fd, client = ret, "accepted connection");
            return Ok(Some(SocketChannel::from_fd(client, blocking)));
        }

        match Errno::last() {
            Errno::EAGAIN => Ok(None),
            errno => Err(Error::system("accept", errno)),
        }
    }

    /// The address this channel is bound to.
    pub fn local_addr(&self) -> Result<InetSocketAddress> {
        getsockname(self.fd()?)?.ok_or(Error::State("socket has no inet address"))
    }
}

impl Default for ServerSocketChannel {
    fn default() -> Self {
        ServerSocketChannel::new()
    }
}

impl Channel for ServerSocketChannel {
    fn is_open(&self) -> bool {
        self.base.is_open()
    }

    fn close(&mut self) {
        self.base.close()
    }
}

impl AsRawFd for ServerSocketChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.base.as_raw_fd()
    }
}

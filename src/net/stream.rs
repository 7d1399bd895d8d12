use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::{
    errno::Errno,
    libc,
    sys::socket::{getsockopt, sockopt},
};
use tracing::debug;

use super::{
    addr::{getpeername, getsockname},
    socket, Channel, InetSocketAddress, ReadOutcome, ReadableByteChannel, SocketChannelBase,
    WritableByteChannel,
};
use crate::{
    buffer::ByteBuffer,
    error::{Error, Result},
};

/// A [SocketChannel] represents a bidirectional TCP connection. There are two ways to get one,
/// either from [super::ServerSocketChannel::accept] or by creating one with [SocketChannel::new]
/// and calling [SocketChannel::connect].
///
/// The descriptor is only allocated once it is needed, so a freshly created channel has no
/// [SocketChannel::fd] until [SocketChannel::connect] is called.
#[derive(Debug)]
pub struct SocketChannel {
    base: SocketChannelBase,
}

impl SocketChannel {
    pub fn new() -> SocketChannel {
        SocketChannel {
            base: SocketChannelBase::new(),
        }
    }

    pub(crate) fn from_fd(fd: OwnedFd, blocking: bool) -> SocketChannel {
        SocketChannel {
            base: SocketChannelBase::from_fd(fd, blocking),
        }
    }

    /// The channel's descriptor, or [Error::State] if it is not allocated yet or already closed.
    pub fn fd(&self) -> Result<RawFd> {
        self.base.fd()
    }

    pub fn is_blocking(&self) -> bool {
        self.base.is_blocking()
    }

    /// See [SocketChannelBase::configure_blocking].
    pub fn configure_blocking(&mut self, blocking: bool) -> Result<()> {
        self.base.configure_blocking(blocking)
    }

    /// Start connecting to `address`. Returns `true` if the connection was established right away,
    /// or `false` if it is in progress, in which case [SocketChannel::finish_connect] completes it
    /// once the descriptor reports writable.
    pub fn connect(&mut self, address: &InetSocketAddress) -> Result<bool> {
        let fd = self.base.acquire(socket::family_of(address))?;
        let (addr, addr_len) = address.to_native();

        let ret = unsafe { libc::connect(fd, addr.as_ptr(), addr_len) };
        if ret == 0 {
            debug!(fd, %address, "connected");
            return Ok(true);
        }

        match Errno::last() {
            Errno::EINPROGRESS => {
                debug!(fd, %address, "connect in progress");
                Ok(false)
            }
            errno => Err(Error::system("connect", errno)),
        }
    }

    /// Check on a connect that is in progress. Returns `false` while it still is, `true` once
    /// connected, and the pending socket error as a [Error::SystemCall] if the connect failed.
    pub fn finish_connect(&mut self) -> Result<bool> {
        let fd = self.base.owned()?;

        let pending = getsockopt(fd, sockopt::SocketError)
            .map_err(|e| Error::system("getsockopt(SO_ERROR)", e))?;
        if pending != 0 {
            return match Errno::from_raw(pending) {
                Errno::EINPROGRESS | Errno::EALREADY => Ok(false),
                errno => Err(Error::system("connect", errno)),
            };
        }

        match getpeername(fd.as_raw_fd()) {
            Ok(_) => {
                debug!(fd = fd.as_raw_fd(), "connect finished");
                Ok(true)
            }
            Err(e) if e.errno() == Some(Errno::ENOTCONN as i32) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The local address of this socket.
    pub fn local_addr(&self) -> Result<InetSocketAddress> {
        getsockname(self.fd()?)?.ok_or(Error::State("socket has no inet address"))
    }

    /// The remote address of this socket, which fails with `ENOTCONN` until connected.
    pub fn peer_addr(&self) -> Result<InetSocketAddress> {
        getpeername(self.fd()?)?.ok_or(Error::State("socket has no inet address"))
    }
}

impl Default for SocketChannel {
    fn default() -> Self {
        SocketChannel::new()
    }
}

impl Channel for SocketChannel {
    fn is_open(&self) -> bool {
        self.base.is_open()
    }

    /// Release the descriptor and any scratch buffers, see [SocketChannelBase::close].
    fn close(&mut self) {
        self.base.close()
    }
}

impl ReadableByteChannel for SocketChannel {
    fn read(&mut self, buffer: &mut ByteBuffer) -> Result<ReadOutcome> {
        self.base.read(buffer)
    }
}

impl WritableByteChannel for SocketChannel {
    fn write(&mut self, buffer: &mut ByteBuffer) -> Result<usize> {
        self.base.write(buffer)
    }
}

impl AsRawFd for SocketChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.base.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn unconnected_channel_has_no_descriptor() {
        let mut channel = SocketChannel::new();
        assert!(matches!(channel.fd(), Err(Error::State(..))));
        assert!(matches!(channel.finish_connect(), Err(Error::State(..))));
        assert!(matches!(
            channel.read(&mut ByteBuffer::allocate(1)),
            Err(Error::State(..))
        ));
    }

    #[test]
    fn blocking_connect_completes_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut channel = SocketChannel::new();
        assert!(channel.connect(&InetSocketAddress::loopback(port)).unwrap());
        assert!(channel.finish_connect().unwrap());
        assert_eq!(channel.peer_addr().unwrap().port(), port);

        let (_peer, remote) = listener.accept().unwrap();
        assert_eq!(channel.local_addr().unwrap().port(), remote.port());
    }

    #[test]
    fn unconnected_socket_reports_not_connected() {
        let mut channel = SocketChannel::new();
        channel.configure_blocking(false).unwrap();
        channel.base.acquire(nix::sys::socket::AddressFamily::Inet).unwrap();
        let err = channel.peer_addr().unwrap_err();
        assert_eq!(err.errno(), Some(Errno::ENOTCONN as i32));
        assert!(!channel.finish_connect().unwrap());
    }
}

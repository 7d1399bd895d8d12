use std::os::fd::{OwnedFd, RawFd};

use nix::{
    errno::Errno,
    fcntl::{fcntl, FcntlArg, OFlag},
    sys::socket::{recv, send, socket, AddressFamily, MsgFlags, SockFlag, SockType},
};
use tracing::trace;

use super::InetSocketAddress;
use crate::error::{Error, Result};

pub(super) fn family_of(addr: &InetSocketAddress) -> AddressFamily {
    if addr.is_ipv4() {
        AddressFamily::Inet
    } else {
        AddressFamily::Inet6
    }
}

/// Create a new close-on-exec TCP socket, starting out non-blocking unless asked otherwise.
pub(super) fn stream_socket(family: AddressFamily, blocking: bool) -> Result<OwnedFd> {
    let mut flags = SockFlag::SOCK_CLOEXEC;
    if !blocking {
        flags |= SockFlag::SOCK_NONBLOCK;
    }

    let fd = socket(family, SockType::Stream, flags, None).map_err(|e| Error::system("socket", e))?;
    trace!(?family, blocking, "created stream socket");
    Ok(fd)
}

/// Toggle `O_NONBLOCK` on an existing descriptor.
pub(super) fn set_blocking(fd: RawFd, blocking: bool) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| Error::system("fcntl(F_GETFL)", e))?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.set(OFlag::O_NONBLOCK, !blocking);

    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| Error::system("fcntl(F_SETFL)", e))?;
    Ok(())
}

/// Receive into `buf`, returning [None] if the call would block.
pub(super) fn recv_some(fd: RawFd, buf: &mut [u8]) -> Result<Option<usize>> {
    match recv(fd, buf, MsgFlags::empty()) {
        Ok(n) => Ok(Some(n)),
        Err(Errno::EAGAIN) => Ok(None),
        Err(e) => Err(Error::system("read", e)),
    }
}

/// Send from `buf`, returning [None] if the socket send buffer is full. Writing to a peer that has
/// gone away reports `EPIPE` rather than raising `SIGPIPE`.
pub(super) fn send_some(fd: RawFd, buf: &[u8]) -> Result<Option<usize>> {
    match send(fd, buf, MsgFlags::MSG_NOSIGNAL) {
        Ok(n) => Ok(Some(n)),
        Err(Errno::EAGAIN) => Ok(None),
        Err(e) => Err(Error::system("write", e)),
    }
}

use std::{
    fmt,
    mem::{self, size_of},
    os::fd::RawFd,
};

use nix::libc;

use super::{Inet4Address, Inet6Address, InetAddress};
use crate::{error::Result, sys::cvt};

/// The native socket address representation handed to `bind(2)`, `connect(2)` and friends. Each
/// value is zero initialized and owned by whoever called [InetSocketAddress::to_native].
#[repr(C)]
pub(crate) union SocketAddrC {
    v4: libc::sockaddr_in,
    v6: libc::sockaddr_in6,
    storage: libc::sockaddr_storage,
}

impl SocketAddrC {
    /// An empty, zeroed address large enough for any family, for calls that fill it in.
    pub(crate) fn new() -> (SocketAddrC, libc::socklen_t) {
        // SAFETY: All variants are plain C structs for which all zero bytes is a valid value.
        let addr: SocketAddrC = unsafe { mem::zeroed() };
        let len = size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        (addr, len)
    }

    pub(crate) fn as_ptr(&self) -> *const libc::sockaddr {
        self as *const _ as *const libc::sockaddr
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut libc::sockaddr {
        self as *mut _ as *mut libc::sockaddr
    }

    fn family(&self) -> libc::c_int {
        // SAFETY: The family field overlaps in every variant.
        unsafe { self.storage.ss_family as libc::c_int }
    }

    /// Convert back into an [InetSocketAddress], returning [None] for families other than
    /// `AF_INET` and `AF_INET6`.
    pub(crate) fn to_inet(&self) -> Option<InetSocketAddress> {
        match self.family() {
            libc::AF_INET => {
                // SAFETY: The family says this is a sockaddr_in.
                let v4 = unsafe { &self.v4 };
                let address = Inet4Address::new(v4.sin_addr.s_addr.to_ne_bytes());
                Some(InetSocketAddress::new(address.into(), u16::from_be(v4.sin_port)))
            }
            libc::AF_INET6 => {
                // SAFETY: The family says this is a sockaddr_in6.
                let v6 = unsafe { &self.v6 };
                let address = Inet6Address::new(v6.sin6_addr.s6_addr);
                Some(InetSocketAddress::new(address.into(), u16::from_be(v6.sin6_port)))
            }
            _ => None,
        }
    }
}

/// An [InetSocketAddress] pairs an [InetAddress] with a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InetSocketAddress {
    address: InetAddress,
    port: u16,
}

impl InetSocketAddress {
    pub fn new(address: InetAddress, port: u16) -> InetSocketAddress {
        InetSocketAddress { address, port }
    }

    /// Resolve `host` via [InetAddress::get_all_by_name] and pair the first result with `port`.
    pub fn resolve(host: &str, port: u16) -> Result<InetSocketAddress> {
        let mut addrs = InetAddress::get_all_by_name(host)?;
        Ok(InetSocketAddress::new(addrs.remove(0), port))
    }

    /// The IPv4 loopback address on the given port.
    pub fn loopback(port: u16) -> InetSocketAddress {
        InetSocketAddress::new(InetAddress::loopback(), port)
    }

    pub fn address(&self) -> &InetAddress {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    /// Build the native representation of this address, returning the structure and its length.
    /// The structure is zero initialized before the family, address and port are filled in, with
    /// the port in network byte order.
    pub(crate) fn to_native(&self) -> (SocketAddrC, libc::socklen_t) {
        match self.address {
            InetAddress::V4(ref v4) => {
                // SAFETY: sockaddr_in is a plain C struct, all zeroes is valid.
                let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = self.port.to_be();
                sin.sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.octets()),
                };

                let socklen = size_of::<libc::sockaddr_in>() as libc::socklen_t;
                (SocketAddrC { v4: sin }, socklen)
            }
            InetAddress::V6(ref v6) => {
                // SAFETY: sockaddr_in6 is a plain C struct, all zeroes is valid.
                let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = self.port.to_be();
                sin6.sin6_addr = libc::in6_addr {
                    s6_addr: v6.octets(),
                };

                let socklen = size_of::<libc::sockaddr_in6>() as libc::socklen_t;
                (SocketAddrC { v6: sin6 }, socklen)
            }
        }
    }
}

impl fmt::Display for InetSocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            InetAddress::V4(ref v4) => write!(f, "{}:{}", v4, self.port),
            InetAddress::V6(ref v6) => write!(f, "[{}]:{}", v6, self.port),
        }
    }
}

/// Retrieve the local address of a bound or connected socket.
pub(crate) fn getsockname(fd: RawFd) -> Result<Option<InetSocketAddress>> {
    let (mut addr, mut len) = SocketAddrC::new();
    cvt(
        unsafe { libc::getsockname(fd, addr.as_mut_ptr(), &mut len) },
        "getsockname",
    )?;
    Ok(addr.to_inet())
}

/// Retrieve the remote address of a connected socket.
pub(crate) fn getpeername(fd: RawFd) -> Result<Option<InetSocketAddress>> {
    let (mut addr, mut len) = SocketAddrC::new();
    cvt(
        unsafe { libc::getpeername(fd, addr.as_mut_ptr(), &mut len) },
        "getpeername",
    )?;
    Ok(addr.to_inet())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_native_layout() {
        let addr = InetSocketAddress::new(Inet4Address::new([10, 0, 0, 1]).into(), 8080);
        let (native, len) = addr.to_native();
        assert_eq!(len as usize, size_of::<libc::sockaddr_in>());

        let sin = unsafe { native.v4 };
        assert_eq!(sin.sin_family as libc::c_int, libc::AF_INET);
        assert_eq!(sin.sin_port, 8080u16.to_be());
        assert_eq!(sin.sin_addr.s_addr.to_ne_bytes(), [10, 0, 0, 1]);
        assert_eq!(native.to_inet(), Some(addr));
    }

    #[test]
    fn ipv6_native_layout() {
        let addr = InetSocketAddress::new(Inet6Address::new(Inet6Address::LOOPBACK).into(), 443);
        let (native, len) = addr.to_native();
        assert_eq!(len as usize, size_of::<libc::sockaddr_in6>());

        let sin6 = unsafe { native.v6 };
        assert_eq!(sin6.sin6_family as libc::c_int, libc::AF_INET6);
        assert_eq!(u16::from_be(sin6.sin6_port), 443);
        assert_eq!(sin6.sin6_flowinfo, 0);
        assert_eq!(sin6.sin6_scope_id, 0);
        assert_eq!(native.to_inet(), Some(addr));
    }

    #[test]
    fn display_brackets_ipv6() {
        assert_eq!(InetSocketAddress::loopback(80).to_string(), "127.0.0.1:80");
        let v6 = InetSocketAddress::new(Inet6Address::new(Inet6Address::LOOPBACK).into(), 9091);
        assert_eq!(v6.to_string(), "[::1]:9091");
    }

    #[test]
    fn resolve_literal_keeps_port() {
        let addr = InetSocketAddress::resolve("[::1]", 1234).unwrap();
        assert_eq!(addr.port(), 1234);
        assert!(!addr.is_ipv4());
    }

    #[test]
    fn empty_native_address_is_unknown_family() {
        let (addr, len) = SocketAddrC::new();
        assert_eq!(len as usize, size_of::<libc::sockaddr_storage>());
        assert!(addr.to_inet().is_none());
    }
}

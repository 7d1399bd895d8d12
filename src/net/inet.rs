use std::{
    ffi::{CStr, CString},
    fmt,
    hash::{Hash, Hasher},
    mem, ptr,
};

use nix::libc;
use tracing::trace;

use crate::error::{Error, Result};

/// An immutable IPv4 address, with an optional host name label. Equality and hashing only consider
/// the raw address bytes, the host name is informational.
#[derive(Debug, Clone)]
pub struct Inet4Address {
    addr: [u8; 4],
    hostname: Option<String>,
}

/// An immutable IPv6 address, with an optional host name label. Like [Inet4Address] only the raw
/// bytes take part in equality and hashing.
#[derive(Debug, Clone)]
pub struct Inet6Address {
    addr: [u8; 16],
    hostname: Option<String>,
}

/// Either an [Inet4Address] or an [Inet6Address].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InetAddress {
    V4(Inet4Address),
    V6(Inet6Address),
}

impl Inet4Address {
    pub const LOOPBACK: [u8; 4] = [127, 0, 0, 1];
    pub const UNSPECIFIED: [u8; 4] = [0, 0, 0, 0];

    pub fn new(addr: [u8; 4]) -> Inet4Address {
        Inet4Address {
            addr,
            hostname: None,
        }
    }

    pub fn with_hostname(addr: [u8; 4], hostname: impl Into<String>) -> Inet4Address {
        Inet4Address {
            addr,
            hostname: Some(hostname.into()),
        }
    }

    /// Parse dotted-quad decimal notation, returning [None] for anything else.
    pub fn parse(text: &str) -> Option<Inet4Address> {
        parse_ipv4(text).map(Inet4Address::new)
    }

    pub fn octets(&self) -> [u8; 4] {
        self.addr
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }
}

impl Inet6Address {
    pub const LOOPBACK: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
    pub const UNSPECIFIED: [u8; 16] = [0; 16];

    pub fn new(addr: [u8; 16]) -> Inet6Address {
        Inet6Address {
            addr,
            hostname: None,
        }
    }

    pub fn with_hostname(addr: [u8; 16], hostname: impl Into<String>) -> Inet6Address {
        Inet6Address {
            addr,
            hostname: Some(hostname.into()),
        }
    }

    /// Parse colon separated hex groups with at most one `::` compression marker.
    pub fn parse(text: &str) -> Option<Inet6Address> {
        parse_ipv6(text).map(Inet6Address::new)
    }

    pub fn octets(&self) -> [u8; 16] {
        self.addr
    }

    /// The address as eight 16 bit groups in network order.
    pub fn segments(&self) -> [u16; 8] {
        let mut groups = [0u16; 8];
        for (i, group) in groups.iter_mut().enumerate() {
            *group = u16::from_be_bytes([self.addr[i * 2], self.addr[i * 2 + 1]]);
        }
        groups
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }
}

impl InetAddress {
    /// Resolve `name` into every distinct address it maps to. IPv4 and IPv6 literals, including
    /// bracketed IPv6 literals, are parsed directly without consulting the system resolver.
    pub fn get_all_by_name(name: &str) -> Result<Vec<InetAddress>> {
        if name.is_empty() {
            return Err(unknown_host(name, "empty host name"));
        }

        if let Some(inner) = name.strip_prefix('[').and_then(|n| n.strip_suffix(']')) {
            return Inet6Address::parse(inner)
                .map(|addr| vec![InetAddress::V6(addr)])
                .ok_or_else(|| unknown_host(name, "invalid IPv6 literal"));
        }

        if name.as_bytes()[0].is_ascii_digit() {
            if let Some(addr) = Inet4Address::parse(name) {
                return Ok(vec![InetAddress::V4(addr)]);
            }
        }

        // Host names never contain a colon, so this can only be an IPv6 literal.
        if name.contains(':') {
            return Inet6Address::parse(name)
                .map(|addr| vec![InetAddress::V6(addr)])
                .ok_or_else(|| unknown_host(name, "invalid IPv6 literal"));
        }

        resolve(name)
    }

    /// The loopback IPv4 address labelled `localhost`.
    pub fn loopback() -> InetAddress {
        InetAddress::V4(Inet4Address::with_hostname(
            Inet4Address::LOOPBACK,
            "localhost",
        ))
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self, InetAddress::V4(..))
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self, InetAddress::V6(..))
    }

    /// The wildcard address of the same family as this address.
    pub fn unspecified_like(&self) -> InetAddress {
        match self {
            InetAddress::V4(..) => InetAddress::V4(Inet4Address::new(Inet4Address::UNSPECIFIED)),
            InetAddress::V6(..) => InetAddress::V6(Inet6Address::new(Inet6Address::UNSPECIFIED)),
        }
    }

    pub fn hostname(&self) -> Option<&str> {
        match self {
            InetAddress::V4(addr) => addr.hostname(),
            InetAddress::V6(addr) => addr.hostname(),
        }
    }
}

impl PartialEq for Inet4Address {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Inet4Address {}

impl Hash for Inet4Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl PartialEq for Inet6Address {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Inet6Address {}

impl Hash for Inet6Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl From<Inet4Address> for InetAddress {
    fn from(addr: Inet4Address) -> Self {
        InetAddress::V4(addr)
    }
}

impl From<Inet6Address> for InetAddress {
    fn from(addr: Inet6Address) -> Self {
        InetAddress::V6(addr)
    }
}

impl fmt::Display for Inet4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.addr;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

/// Renders the canonical form: the longest run of two or more zero groups, the earliest one on a
/// tie, collapses to `::` and every other group is lowercase hex without leading zeros.
impl fmt::Display for Inet6Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups = self.segments();
        let (start, len) = longest_zero_run(&groups);

        if len < 2 {
            return write_groups(f, &groups);
        }

        write_groups(f, &groups[..start])?;
        f.write_str("::")?;
        write_groups(f, &groups[start + len..])
    }
}

impl fmt::Display for InetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InetAddress::V4(addr) => fmt::Display::fmt(addr, f),
            InetAddress::V6(addr) => fmt::Display::fmt(addr, f),
        }
    }
}

fn write_groups(f: &mut fmt::Formatter<'_>, groups: &[u16]) -> fmt::Result {
    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            f.write_str(":")?;
        }
        write!(f, "{:x}", group)?;
    }
    Ok(())
}

fn longest_zero_run(groups: &[u16; 8]) -> (usize, usize) {
    let (mut best_start, mut best_len) = (0, 0);
    let mut i = 0;
    while i < groups.len() {
        if groups[i] != 0 {
            i += 1;
            continue;
        }

        let start = i;
        while i < groups.len() && groups[i] == 0 {
            i += 1;
        }
        if i - start > best_len {
            best_start = start;
            best_len = i - start;
        }
    }
    (best_start, best_len)
}

pub(crate) fn parse_ipv4(text: &str) -> Option<[u8; 4]> {
    let mut result = [0u8; 4];
    let mut segments = text.split('.');

    for octet in result.iter_mut() {
        let segment = segments.next()?;
        if segment.is_empty() || segment.len() > 3 || !segment.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = segment.parse::<u16>().ok().filter(|v| *v <= 255)? as u8;
    }

    if segments.next().is_some() {
        return None;
    }
    Some(result)
}

pub(crate) fn parse_ipv6(text: &str) -> Option<[u8; 16]> {
    let mut groups = [0u16; 8];

    match text.find("::") {
        Some(idx) => {
            // A second marker, including the overlapping one in ":::", is never valid.
            if text[idx + 1..].contains("::") {
                return None;
            }

            let head = parse_groups(&text[..idx])?;
            let tail = parse_groups(&text[idx + 2..])?;
            if head.len() + tail.len() > 7 {
                return None;
            }

            groups[..head.len()].copy_from_slice(&head);
            groups[8 - tail.len()..].copy_from_slice(&tail);
        }
        None => {
            let all = parse_groups(text)?;
            if all.len() != 8 {
                return None;
            }
            groups.copy_from_slice(&all);
        }
    }

    let mut result = [0u8; 16];
    for (i, group) in groups.iter().enumerate() {
        result[i * 2..i * 2 + 2].copy_from_slice(&group.to_be_bytes());
    }
    Some(result)
}

fn parse_groups(text: &str) -> Option<Vec<u16>> {
    if text.is_empty() {
        return Some(Vec::new());
    }

    text.split(':')
        .map(|group| {
            if group.is_empty() || group.len() > 4 || !group.bytes().all(|b| b.is_ascii_hexdigit())
            {
                return None;
            }
            u16::from_str_radix(group, 16).ok()
        })
        .collect()
}

fn unknown_host(host: &str, reason: impl Into<String>) -> Error {
    Error::UnknownHost {
        host: host.to_string(),
        reason: reason.into(),
    }
}

fn resolve(host: &str) -> Result<Vec<InetAddress>> {
    let c_host =
        CString::new(host).map_err(|_| unknown_host(host, "host name contains a nul byte"))?;

    let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_STREAM;

    let mut head: *mut libc::addrinfo = ptr::null_mut();
    let rc = unsafe { libc::getaddrinfo(c_host.as_ptr(), ptr::null(), &hints, &mut head) };
    if rc != 0 {
        let reason = unsafe { CStr::from_ptr(libc::gai_strerror(rc)) };
        return Err(unknown_host(host, reason.to_string_lossy()));
    }

    let mut results: Vec<InetAddress> = Vec::new();
    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: getaddrinfo returned a valid linked list which we only free after the walk.
        let info = unsafe { &*cursor };
        cursor = info.ai_next;

        if info.ai_addr.is_null() {
            continue;
        }

        let addr = match info.ai_family {
            libc::AF_INET => {
                let sin = unsafe { &*(info.ai_addr as *const libc::sockaddr_in) };
                let octets = sin.sin_addr.s_addr.to_ne_bytes();
                InetAddress::V4(Inet4Address::with_hostname(octets, host))
            }
            libc::AF_INET6 => {
                let sin6 = unsafe { &*(info.ai_addr as *const libc::sockaddr_in6) };
                InetAddress::V6(Inet6Address::with_hostname(sin6.sin6_addr.s6_addr, host))
            }
            _ => continue,
        };

        if !results.contains(&addr) {
            results.push(addr);
        }
    }
    unsafe { libc::freeaddrinfo(head) };

    trace!(host, count = results.len(), "resolved host");
    if results.is_empty() {
        return Err(unknown_host(host, "no usable addresses"));
    }
    Ok(results)
}

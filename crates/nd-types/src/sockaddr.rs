//! Raw socket-address codec.
//!
//! The framework exchanges addresses with providers and callers as raw
//! sockaddr byte buffers in a fixed layout: a 16-bit little-endian family
//! tag, a big-endian port, then the family-specific body. IPv4 addresses
//! occupy 16 bytes (4 address bytes, zero tail); IPv6 addresses occupy 28
//! bytes (big-endian flow info, 16 address bytes, little-endian scope id).
//! The family values are the NetworkDirect wire values and do not vary by
//! host platform.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::error::{NdError, NdResult};

/// Smallest buffer that can hold any valid socket address.
pub const SOCKADDR_MIN_LEN: usize = 16;
/// Canonical length of an IPv4 socket address.
pub const SOCKADDR_V4_LEN: usize = 16;
/// Canonical length of an IPv6 socket address.
pub const SOCKADDR_V6_LEN: usize = 28;

/// Address families understood by the framework, with their wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum AddressFamily {
    Ipv4 = 2,
    Ipv6 = 23,
}

impl AddressFamily {
    /// Canonical sockaddr length for this family.
    pub fn sockaddr_len(self) -> usize {
        match self {
            AddressFamily::Ipv4 => SOCKADDR_V4_LEN,
            AddressFamily::Ipv6 => SOCKADDR_V6_LEN,
        }
    }

    /// Byte range of the network address within the sockaddr layout.
    fn addr_range(self) -> std::ops::Range<usize> {
        match self {
            AddressFamily::Ipv4 => 4..8,
            AddressFamily::Ipv6 => 8..24,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown address family '{0}'")]
pub struct FamilyParseError(String);

impl FromStr for AddressFamily {
    type Err = FamilyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipv4" => Ok(AddressFamily::Ipv4),
            "ipv6" => Ok(AddressFamily::Ipv6),
            other => Err(FamilyParseError(other.to_string())),
        }
    }
}

/// Reads the raw family tag, if the buffer is long enough to carry one.
pub fn family_of(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < 2 {
        return None;
    }
    Some(LittleEndian::read_u16(&bytes[..2]))
}

/// Length bounds alone: the buffer must cover the family tag and port, and
/// its size must fit the u32 byte counts used on the wire.
fn check_sockaddr_len(len: usize) -> NdResult<()> {
    if len > u32::MAX as usize {
        return Err(NdError::InvalidParameter("socket address larger than a u32 can describe"));
    }
    if len < SOCKADDR_MIN_LEN {
        return Err(NdError::InvalidParameter("socket address shorter than 16 bytes"));
    }
    Ok(())
}

/// Checks that `bytes` is a well-formed socket address.
///
/// Buffers shorter than the family's layout, or too large for a u32 byte
/// count, are an invalid parameter; an unrecognized family is an invalid
/// address.
pub fn validate_sockaddr(bytes: &[u8]) -> NdResult<AddressFamily> {
    check_sockaddr_len(bytes.len())?;
    let raw = LittleEndian::read_u16(&bytes[..2]);
    let family = AddressFamily::try_from(raw).map_err(|_| NdError::InvalidAddress)?;
    if family == AddressFamily::Ipv6 && bytes.len() < SOCKADDR_V6_LEN {
        return Err(NdError::InvalidParameter("IPv6 socket address shorter than 28 bytes"));
    }
    Ok(family)
}

/// An owned, validated socket address in the raw wire layout.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SockAddr {
    family: AddressFamily,
    bytes: [u8; SOCKADDR_V6_LEN],
}

#[allow(clippy::len_without_is_empty)]
impl SockAddr {
    /// Validates `bytes` and takes an owned copy, truncated to the family's
    /// canonical length.
    pub fn from_bytes(bytes: &[u8]) -> NdResult<SockAddr> {
        let family = validate_sockaddr(bytes)?;
        let len = family.sockaddr_len();
        let mut stored = [0u8; SOCKADDR_V6_LEN];
        stored[..len].copy_from_slice(&bytes[..len]);
        Ok(SockAddr { family, bytes: stored })
    }

    pub fn from_socket_addr(addr: &SocketAddr) -> SockAddr {
        let mut bytes = [0u8; SOCKADDR_V6_LEN];
        BigEndian::write_u16(&mut bytes[2..4], addr.port());
        let family = match addr {
            SocketAddr::V4(v4) => {
                bytes[4..8].copy_from_slice(&v4.ip().octets());
                AddressFamily::Ipv4
            }
            SocketAddr::V6(v6) => {
                BigEndian::write_u32(&mut bytes[4..8], v6.flowinfo());
                bytes[8..24].copy_from_slice(&v6.ip().octets());
                LittleEndian::write_u32(&mut bytes[24..28], v6.scope_id());
                AddressFamily::Ipv6
            }
        };
        LittleEndian::write_u16(&mut bytes[..2], family.into());
        SockAddr { family, bytes }
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Canonical length of the raw form.
    pub fn len(&self) -> usize {
        self.family.sockaddr_len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    pub fn port(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[2..4])
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        match self.family {
            AddressFamily::Ipv4 => {
                let ip = Ipv4Addr::new(self.bytes[4], self.bytes[5], self.bytes[6], self.bytes[7]);
                SocketAddr::V4(SocketAddrV4::new(ip, self.port()))
            }
            AddressFamily::Ipv6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.bytes[8..24]);
                let flowinfo = BigEndian::read_u32(&self.bytes[4..8]);
                let scope = LittleEndian::read_u32(&self.bytes[24..28]);
                SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(octets), self.port(), flowinfo, scope))
            }
        }
    }

    /// Whether `candidate` refers to the same interface address.
    ///
    /// The families must be equal and the network address bytes must match;
    /// ports are deliberately ignored. A candidate shorter than its family's
    /// layout never matches.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        match family_of(candidate) {
            Some(raw) if raw == u16::from(self.family) => {}
            _ => return false,
        }
        if candidate.len() < self.family.sockaddr_len() {
            return false;
        }
        let range = self.family.addr_range();
        candidate[range.clone()] == self.bytes[range]
    }

    /// Copies the raw form into `out`, returning the number of bytes written,
    /// or 0 if `out` cannot hold it.
    pub fn copy_to(&self, out: &mut [u8]) -> usize {
        let len = self.len();
        if out.len() < len {
            return 0;
        }
        out[..len].copy_from_slice(&self.bytes[..len]);
        len
    }
}

impl From<SocketAddr> for SockAddr {
    fn from(addr: SocketAddr) -> SockAddr {
        SockAddr::from_socket_addr(&addr)
    }
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_socket_addr())
    }
}

impl fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SockAddr({})", self.to_socket_addr())
    }
}

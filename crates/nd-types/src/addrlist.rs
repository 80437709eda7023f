//! Flattened address-list format.
//!
//! A serialized list is one contiguous buffer: a little-endian `u32` entry
//! count, then one `{ offset: u32, len: u32 }` descriptor per entry (offset
//! measured from the start of the buffer), then the raw sockaddr bytes packed
//! back to back. Callers walk the descriptors and slice the buffer; the
//! layout carries no pointers and is position independent.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{NdError, NdResult};
use crate::sockaddr::{AddressFamily, SockAddr, SOCKADDR_V4_LEN, SOCKADDR_V6_LEN};

/// Size of the leading entry-count header.
pub const LIST_HEADER_LEN: usize = 4;
/// Size of one entry descriptor.
pub const LIST_DESCRIPTOR_LEN: usize = 8;

/// Exact buffer size for a list holding the given number of addresses per
/// family.
pub fn required_size(v4_count: usize, v6_count: usize) -> usize {
    LIST_HEADER_LEN
        + (v4_count + v6_count) * LIST_DESCRIPTOR_LEN
        + v4_count * SOCKADDR_V4_LEN
        + v6_count * SOCKADDR_V6_LEN
}

fn count_families(addrs: &[SockAddr]) -> (usize, usize) {
    let v4 = addrs.iter().filter(|a| a.family() == AddressFamily::Ipv4).count();
    (v4, addrs.len() - v4)
}

/// Serializes `addrs` into `out` using the overflow-then-retry protocol.
///
/// An empty list succeeds with 0 bytes written regardless of the buffer. A
/// missing or undersized buffer reports [`NdError::BufferOverflow`] carrying
/// the exact required size; a retry with that size succeeds. On success the
/// number of bytes written is returned, and entries keep their input order.
pub fn write_list(addrs: &[SockAddr], out: Option<&mut [u8]>) -> NdResult<usize> {
    if addrs.is_empty() {
        return Ok(0);
    }

    let (v4_count, v6_count) = count_families(addrs);
    let required = required_size(v4_count, v6_count);
    let out = match out {
        Some(buf) if buf.len() >= required => buf,
        _ => return Err(NdError::BufferOverflow { required }),
    };

    LittleEndian::write_u32(&mut out[..LIST_HEADER_LEN], addrs.len() as u32);
    let mut desc = LIST_HEADER_LEN;
    let mut data = LIST_HEADER_LEN + addrs.len() * LIST_DESCRIPTOR_LEN;
    for addr in addrs {
        let raw = addr.as_bytes();
        LittleEndian::write_u32(&mut out[desc..desc + 4], data as u32);
        LittleEndian::write_u32(&mut out[desc + 4..desc + 8], raw.len() as u32);
        out[data..data + raw.len()].copy_from_slice(raw);
        desc += LIST_DESCRIPTOR_LEN;
        data += raw.len();
    }
    Ok(data)
}

/// Read-only cursor over a serialized address list.
pub struct AddressListView<'a> {
    buf: &'a [u8],
    count: usize,
}

impl<'a> AddressListView<'a> {
    /// Validates the header and descriptor region of `buf`.
    ///
    /// Individual descriptor targets are checked lazily by [`Self::get`].
    pub fn parse(buf: &'a [u8]) -> NdResult<AddressListView<'a>> {
        if buf.len() < LIST_HEADER_LEN {
            return Err(NdError::InvalidParameter("address list shorter than its header"));
        }
        let count = LittleEndian::read_u32(&buf[..LIST_HEADER_LEN]) as usize;
        let descriptors_end = count
            .checked_mul(LIST_DESCRIPTOR_LEN)
            .and_then(|n| n.checked_add(LIST_HEADER_LEN))
            .ok_or(NdError::InvalidParameter("address list count overflows"))?;
        if buf.len() < descriptors_end {
            return Err(NdError::InvalidParameter("address list descriptors exceed the buffer"));
        }
        Ok(AddressListView { buf, count })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Raw sockaddr bytes of entry `index`.
    pub fn get(&self, index: usize) -> NdResult<&'a [u8]> {
        if index >= self.count {
            return Err(NdError::InvalidParameter("address list index out of range"));
        }
        let desc = LIST_HEADER_LEN + index * LIST_DESCRIPTOR_LEN;
        let offset = LittleEndian::read_u32(&self.buf[desc..desc + 4]) as usize;
        let len = LittleEndian::read_u32(&self.buf[desc + 4..desc + 8]) as usize;
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(NdError::InvalidParameter("descriptor points outside the buffer"))?;
        Ok(&self.buf[offset..end])
    }

    /// Iterates the entries as raw byte slices.
    pub fn iter(&self) -> impl Iterator<Item = NdResult<&'a [u8]>> + '_ {
        (0..self.count).map(move |index| self.get(index))
    }

    /// Iterates the entries as validated [`SockAddr`] values.
    pub fn addrs(&self) -> impl Iterator<Item = NdResult<SockAddr>> + '_ {
        self.iter().map(|entry| entry.and_then(SockAddr::from_bytes))
    }
}

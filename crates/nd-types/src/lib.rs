//! Shared vocabulary for the NetworkDirect-style provider framework.
//!
//! Everything here is plain data: the closed error vocabulary, provider
//! identities, the raw socket-address codec, and the flattened address-list
//! format exchanged with providers and callers.

pub mod addrlist;
pub mod error;
pub mod flags;
pub mod guid;
pub mod sockaddr;

// Re-export commonly used items at the crate root.
pub use addrlist::{required_size, write_list, AddressListView, LIST_DESCRIPTOR_LEN, LIST_HEADER_LEN};
pub use error::{NdError, NdResult};
pub use flags::QueryFlags;
pub use guid::{GuidParseError, ProviderId};
pub use sockaddr::{
    family_of, validate_sockaddr, AddressFamily, SockAddr, SOCKADDR_MIN_LEN, SOCKADDR_V4_LEN,
    SOCKADDR_V6_LEN,
};

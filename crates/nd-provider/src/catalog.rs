//! The provider catalog seam and the NetworkDirect entry filter.

use bitflags::bitflags;

use nd_types::{AddressFamily, NdResult, ProviderId};

use crate::api::ProviderGeneration;

bitflags! {
    /// Transport guarantees a catalog entry advertises.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ServiceFlags: u32 {
        const GUARANTEED_DELIVERY = 0x0001;
        const GUARANTEED_ORDER = 0x0002;
        const MESSAGE_ORIENTED = 0x0008;
        const CONNECT_DATA = 0x0080;
    }

    /// Visibility and dispatch bits of a catalog entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProviderFlags: u32 {
        const HIDDEN = 0x04;
        const NETWORKDIRECT = 0x10;
    }
}

/// Service guarantees every NetworkDirect entry must advertise.
pub const REQUIRED_SERVICE_FLAGS: ServiceFlags = ServiceFlags::GUARANTEED_DELIVERY
    .union(ServiceFlags::GUARANTEED_ORDER)
    .union(ServiceFlags::MESSAGE_ORIENTED)
    .union(ServiceFlags::CONNECT_DATA);

/// Socket-type wildcard NetworkDirect entries register with.
pub const SOCKET_TYPE_ANY: i32 = -1;

/// One row of the provider catalog.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub provider_id: ProviderId,
    pub version: u32,
    pub service_flags: ServiceFlags,
    pub provider_flags: ProviderFlags,
    /// Raw wire family value.
    pub family: u16,
    pub socket_type: i32,
    pub protocol: i32,
    pub protocol_max_offset: i32,
}

impl CatalogEntry {
    /// The canonical row a NetworkDirect provider registers for one family.
    pub fn networkdirect(
        provider_id: ProviderId,
        generation: ProviderGeneration,
        family: AddressFamily,
    ) -> CatalogEntry {
        let provider_flags = match generation {
            ProviderGeneration::V1 => ProviderFlags::HIDDEN,
            ProviderGeneration::V2 => ProviderFlags::HIDDEN.union(ProviderFlags::NETWORKDIRECT),
        };
        CatalogEntry {
            provider_id,
            version: generation.catalog_version(),
            service_flags: REQUIRED_SERVICE_FLAGS,
            provider_flags,
            family: family.into(),
            socket_type: SOCKET_TYPE_ANY,
            protocol: 0,
            protocol_max_offset: 0,
        }
    }

    /// The generation this row qualifies for as a NetworkDirect provider,
    /// or `None` if it is some other protocol entry.
    pub fn networkdirect_generation(&self) -> Option<ProviderGeneration> {
        if !self.service_flags.contains(REQUIRED_SERVICE_FLAGS) {
            return None;
        }

        let generation = match self.version {
            1 => {
                // v1 providers do not always set the NETWORKDIRECT flag.
                if !self.provider_flags.contains(ProviderFlags::HIDDEN) {
                    return None;
                }
                ProviderGeneration::V1
            }
            2 => {
                if !self
                    .provider_flags
                    .contains(ProviderFlags::HIDDEN.union(ProviderFlags::NETWORKDIRECT))
                {
                    return None;
                }
                ProviderGeneration::V2
            }
            _ => return None,
        };

        if AddressFamily::try_from(self.family).is_err() {
            return None;
        }
        if self.socket_type != SOCKET_TYPE_ANY {
            return None;
        }
        if self.protocol != 0 {
            return None;
        }
        if self.protocol_max_offset != 0 {
            return None;
        }
        Some(generation)
    }
}

/// Source of provider discovery.
pub trait ProviderCatalog: Send + Sync {
    /// A snapshot of the current catalog rows.
    fn entries(&self) -> NdResult<Vec<CatalogEntry>>;

    /// The module path registered for `id`, before environment expansion.
    fn provider_path(&self, id: &ProviderId) -> NdResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_id() -> ProviderId {
        "52cb6aac-0112-4428-93b6-eb25e6b7a0e2".parse().unwrap()
    }

    fn v2_entry() -> CatalogEntry {
        CatalogEntry::networkdirect(test_id(), ProviderGeneration::V2, AddressFamily::Ipv4)
    }

    #[test]
    fn test_canonical_entries_pass_the_filter() {
        for generation in [ProviderGeneration::V1, ProviderGeneration::V2] {
            for family in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
                let entry = CatalogEntry::networkdirect(test_id(), generation, family);
                assert_eq!(entry.networkdirect_generation(), Some(generation));
            }
        }
    }

    #[test]
    fn test_service_flags_must_all_be_present() {
        let mut entry = v2_entry();
        entry.service_flags = REQUIRED_SERVICE_FLAGS.difference(ServiceFlags::CONNECT_DATA);
        assert_eq!(entry.networkdirect_generation(), None);

        // Extra bits are allowed as long as the required ones are set.
        let mut entry = v2_entry();
        entry.service_flags |= ServiceFlags::from_bits_retain(0x4000);
        assert_eq!(entry.networkdirect_generation(), Some(ProviderGeneration::V2));
    }

    #[test]
    fn test_v2_requires_networkdirect_flag() {
        let mut entry = v2_entry();
        entry.provider_flags = ProviderFlags::HIDDEN;
        assert_eq!(entry.networkdirect_generation(), None);
    }

    #[test]
    fn test_v1_requires_only_hidden() {
        let mut entry =
            CatalogEntry::networkdirect(test_id(), ProviderGeneration::V1, AddressFamily::Ipv4);
        assert_eq!(entry.provider_flags, ProviderFlags::HIDDEN);
        assert_eq!(entry.networkdirect_generation(), Some(ProviderGeneration::V1));

        entry.provider_flags = ProviderFlags::empty();
        assert_eq!(entry.networkdirect_generation(), None);
    }

    #[test]
    fn test_rejects_foreign_descriptors() {
        let mut entry = v2_entry();
        entry.family = 99;
        assert_eq!(entry.networkdirect_generation(), None);

        let mut entry = v2_entry();
        entry.socket_type = 1;
        assert_eq!(entry.networkdirect_generation(), None);

        let mut entry = v2_entry();
        entry.protocol = 6;
        assert_eq!(entry.networkdirect_generation(), None);

        let mut entry = v2_entry();
        entry.protocol_max_offset = 4;
        assert_eq!(entry.networkdirect_generation(), None);

        let mut entry = v2_entry();
        entry.version = 3;
        assert_eq!(entry.networkdirect_generation(), None);
    }
}

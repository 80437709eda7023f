//! Interfaces provider modules implement.
//!
//! Two provider generations coexist. Legacy (v1) modules expose a class
//! factory whose instances open adapters directly from a raw socket address.
//! Current (v2) modules expose a provider object that first resolves the
//! address to an opaque adapter id and then opens the adapter for that id.

use std::any::Any;
use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use nd_types::{NdError, NdResult};

/// Provider generations supported side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderGeneration {
    V1,
    V2,
}

impl ProviderGeneration {
    /// Version number catalog entries use to announce this generation.
    pub fn catalog_version(self) -> u32 {
        match self {
            ProviderGeneration::V1 => 1,
            ProviderGeneration::V2 => 2,
        }
    }
}

impl fmt::Display for ProviderGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderGeneration::V1 => write!(f, "v1"),
            ProviderGeneration::V2 => write!(f, "v2"),
        }
    }
}

/// Adapter interface a caller requests when opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceId {
    AdapterV1,
    AdapterV2,
}

impl InterfaceId {
    /// The provider generation able to serve this interface.
    pub fn generation(self) -> ProviderGeneration {
        match self {
            InterfaceId::AdapterV1 => ProviderGeneration::V1,
            InterfaceId::AdapterV2 => ProviderGeneration::V2,
        }
    }
}

/// Class-object interfaces a module can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ClassIid {
    ClassFactory = 1,
    Provider = 2,
}

/// An opened adapter. The verbs surface behind it belongs to the provider
/// module; the framework only brokers creation.
pub trait Adapter: Send {
    /// Access to the module's concrete adapter type.
    fn as_any(&self) -> &dyn Any;
}

/// Object factory exposed by legacy modules.
pub trait ClassFactory: Send {
    fn create_instance(&self) -> NdResult<Box<dyn ProviderV1>>;
}

/// Legacy provider surface: adapters open directly from a raw address.
pub trait ProviderV1: Send {
    fn open_adapter(&self, address: &[u8]) -> NdResult<Box<dyn Adapter>>;

    /// Copies the flattened address list serviced by this provider into
    /// `out`, with the overflow-then-retry sizing protocol.
    fn query_address_list(&self, out: Option<&mut [u8]>) -> NdResult<usize>;
}

/// Current provider surface: addresses resolve to adapter ids first.
pub trait ProviderV2: Send {
    /// Resolves a raw socket address to the id of the servicing adapter.
    fn resolve_address(&self, address: &[u8]) -> NdResult<u64>;

    fn open_adapter(&self, iid: InterfaceId, adapter_id: u64) -> NdResult<Box<dyn Adapter>>;

    /// Same contract as [`ProviderV1::query_address_list`].
    fn query_address_list(&self, out: Option<&mut [u8]>) -> NdResult<usize>;
}

/// What a module hands back from its class-object entry point.
pub enum ClassObject {
    Factory(Box<dyn ClassFactory>),
    Provider(Box<dyn ProviderV2>),
}

impl ClassObject {
    pub fn into_factory(self) -> NdResult<Box<dyn ClassFactory>> {
        match self {
            ClassObject::Factory(factory) => Ok(factory),
            ClassObject::Provider(_) => Err(NdError::unsuccessful(
                "module returned a provider where a class factory was requested",
            )),
        }
    }

    pub fn into_provider(self) -> NdResult<Box<dyn ProviderV2>> {
        match self {
            ClassObject::Provider(provider) => Ok(provider),
            ClassObject::Factory(_) => Err(NdError::unsuccessful(
                "module returned a class factory where a provider was requested",
            )),
        }
    }
}

//! Provider discovery, dynamic module loading, and the provider-side
//! NetworkDirect interfaces.

pub mod api;
pub mod catalog;
pub mod file_catalog;
pub mod module;
pub mod provider;

pub use api::{
    Adapter, ClassFactory, ClassIid, ClassObject, InterfaceId, ProviderGeneration, ProviderV1,
    ProviderV2,
};
pub use catalog::{CatalogEntry, ProviderCatalog, ProviderFlags, ServiceFlags};
pub use file_catalog::FileCatalog;
pub use module::{DylibLoader, DylibModule, ModuleLoader, ProviderModule};
pub use provider::Provider;

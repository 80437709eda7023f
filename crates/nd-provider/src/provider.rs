//! A registered provider and its module lifecycle.
//!
//! The module behind a provider is loaded on first use and released again as
//! soon as the module consents, so an idle provider keeps nothing mapped.
//! Every failure while opening an adapter is reported as
//! [`NdError::InvalidAddress`], whatever the stage, so callers see one
//! stable outcome when a provider cannot service an address; the underlying
//! cause is logged at debug level. Address-list queries report interface
//! failures as [`NdError::NotReady`] and pass the module's sizing protocol
//! through unchanged.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use nd_types::{NdError, NdResult, ProviderId};

use crate::api::{Adapter, ClassIid, InterfaceId, ProviderGeneration, ProviderV1, ProviderV2};
use crate::catalog::ProviderCatalog;
use crate::module::{ModuleLoader, ProviderModule};

/// Expands `${VAR}` references against the process environment. Unknown
/// variables stay as written; an unterminated reference is an error.
fn expand_env(path: &str) -> NdResult<String> {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            NdError::unsuccessful(format!("unterminated variable reference in {:?}", path))
        })?;
        match std::env::var(&after[..end]) {
            Ok(value) => out.push_str(&value),
            Err(_) => out.push_str(&rest[start..start + end + 3]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// One provider from the catalog, addressed by its id.
pub struct Provider {
    id: ProviderId,
    generation: ProviderGeneration,
    path: String,
    active: AtomicBool,
    module: RwLock<Option<Arc<dyn ProviderModule>>>,
    loader: Arc<dyn ModuleLoader>,
}

impl Provider {
    /// Resolves the module path for `id` from the catalog and expands any
    /// environment references in it. The module itself is not loaded yet.
    pub fn init(
        catalog: &dyn ProviderCatalog,
        id: ProviderId,
        generation: ProviderGeneration,
        loader: Arc<dyn ModuleLoader>,
    ) -> NdResult<Provider> {
        let registered = catalog.provider_path(&id)?;
        let path = expand_env(&registered)?;
        Ok(Provider {
            id,
            generation,
            path,
            active: AtomicBool::new(true),
            module: RwLock::new(None),
            loader,
        })
    }

    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    pub fn generation(&self) -> ProviderGeneration {
        self.generation
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the provider appeared in the most recent catalog snapshot.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// The loaded module, loading it on first use. A racing load keeps the
    /// first copy that lands in the slot and discards the other.
    fn module(&self) -> NdResult<Arc<dyn ProviderModule>> {
        if let Some(module) = self.module.read().as_ref() {
            return Ok(module.clone());
        }
        let loaded = self.loader.load(&self.path)?;
        let mut slot = self.module.write();
        match slot.as_ref() {
            Some(existing) => Ok(existing.clone()),
            None => {
                *slot = Some(loaded.clone());
                Ok(loaded)
            }
        }
    }

    /// Releases the module if it is loaded and consents to unloading.
    /// Returns whether the provider ends up with no module mapped.
    pub fn try_unload(&self) -> bool {
        let mut slot = self.module.write();
        match slot.as_ref() {
            Some(module) if module.can_unload_now() => {
                *slot = None;
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    fn instantiate_v1(&self) -> NdResult<Box<dyn ProviderV1>> {
        let module = self.module()?;
        let factory = module.class_object(ClassIid::ClassFactory)?.into_factory()?;
        factory.create_instance()
    }

    fn instantiate_v2(&self) -> NdResult<Box<dyn ProviderV2>> {
        self.module()?.class_object(ClassIid::Provider)?.into_provider()
    }

    /// Opens an adapter for a local address serviced by this provider.
    pub fn open_adapter(&self, iid: InterfaceId, address: &[u8]) -> NdResult<Box<dyn Adapter>> {
        let result = match self.generation {
            ProviderGeneration::V1 => {
                if iid != InterfaceId::AdapterV1 {
                    return Err(NdError::InvalidParameter(
                        "v1 providers only serve the v1 adapter interface",
                    ));
                }
                self.open_adapter_v1(address)
            }
            ProviderGeneration::V2 => self.open_adapter_v2(iid, address),
        };
        self.try_unload();
        result
    }

    fn open_adapter_v1(&self, address: &[u8]) -> NdResult<Box<dyn Adapter>> {
        self.instantiate_v1()
            .and_then(|provider| provider.open_adapter(address))
            .map_err(|err| {
                tracing::debug!("Provider {} cannot open a v1 adapter: {}", self.id, err);
                NdError::InvalidAddress
            })
    }

    fn open_adapter_v2(&self, iid: InterfaceId, address: &[u8]) -> NdResult<Box<dyn Adapter>> {
        self.instantiate_v2()
            .and_then(|provider| {
                let adapter_id = provider.resolve_address(address)?;
                provider.open_adapter(iid, adapter_id)
            })
            .map_err(|err| {
                tracing::debug!("Provider {} cannot open a v2 adapter: {}", self.id, err);
                NdError::InvalidAddress
            })
    }

    /// Writes the provider's address list into `out`, reporting the required
    /// size through [`NdError::BufferOverflow`] when it does not fit.
    pub fn query_address_list(&self, out: Option<&mut [u8]>) -> NdResult<usize> {
        let result = match self.generation {
            ProviderGeneration::V1 => match self.instantiate_v1() {
                Ok(provider) => provider.query_address_list(out),
                Err(err) => {
                    tracing::debug!("Provider {} has no usable v1 interface: {}", self.id, err);
                    Err(NdError::NotReady)
                }
            },
            ProviderGeneration::V2 => match self.instantiate_v2() {
                Ok(provider) => provider.query_address_list(out),
                Err(err) => {
                    tracing::debug!("Provider {} has no usable v2 interface: {}", self.id, err);
                    Err(NdError::NotReady)
                }
            },
        };
        self.try_unload();
        result
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use nd_types::{AddressListView, SockAddr, write_list};

    use super::*;
    use crate::api::ClassObject;
    use crate::catalog::CatalogEntry;

    /// Behavior knobs and call recorders shared by a mock module tree.
    #[derive(Default)]
    struct ModuleScript {
        refuse_unload: AtomicBool,
        fail_class_object: AtomicBool,
        fail_resolve: AtomicBool,
        fail_open: AtomicBool,
        addresses: Mutex<Vec<SockAddr>>,
        resolved: Mutex<Vec<Vec<u8>>>,
        opened: Mutex<Vec<Vec<u8>>>,
        opened_ids: Mutex<Vec<u64>>,
    }

    struct MockAdapter;

    impl Adapter for MockAdapter {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct MockProviderV1 {
        script: Arc<ModuleScript>,
    }

    impl ProviderV1 for MockProviderV1 {
        fn open_adapter(&self, address: &[u8]) -> NdResult<Box<dyn Adapter>> {
            if self.script.fail_open.load(Ordering::Relaxed) {
                return Err(NdError::unsuccessful("adapter offline"));
            }
            self.script.opened.lock().push(address.to_vec());
            Ok(Box::new(MockAdapter))
        }

        fn query_address_list(&self, out: Option<&mut [u8]>) -> NdResult<usize> {
            write_list(&self.script.addresses.lock(), out)
        }
    }

    struct MockProviderV2 {
        script: Arc<ModuleScript>,
    }

    impl ProviderV2 for MockProviderV2 {
        fn resolve_address(&self, address: &[u8]) -> NdResult<u64> {
            if self.script.fail_resolve.load(Ordering::Relaxed) {
                return Err(NdError::unsuccessful("no adapter for address"));
            }
            self.script.resolved.lock().push(address.to_vec());
            Ok(7)
        }

        fn open_adapter(&self, _iid: InterfaceId, adapter_id: u64) -> NdResult<Box<dyn Adapter>> {
            if self.script.fail_open.load(Ordering::Relaxed) {
                return Err(NdError::unsuccessful("adapter offline"));
            }
            self.script.opened_ids.lock().push(adapter_id);
            Ok(Box::new(MockAdapter))
        }

        fn query_address_list(&self, out: Option<&mut [u8]>) -> NdResult<usize> {
            write_list(&self.script.addresses.lock(), out)
        }
    }

    struct MockFactory {
        script: Arc<ModuleScript>,
    }

    impl crate::api::ClassFactory for MockFactory {
        fn create_instance(&self) -> NdResult<Box<dyn ProviderV1>> {
            Ok(Box::new(MockProviderV1 { script: self.script.clone() }))
        }
    }

    struct MockModule {
        script: Arc<ModuleScript>,
    }

    impl ProviderModule for MockModule {
        fn class_object(&self, iid: ClassIid) -> NdResult<ClassObject> {
            if self.script.fail_class_object.load(Ordering::Relaxed) {
                return Err(NdError::unsuccessful("scripted class object failure"));
            }
            match iid {
                ClassIid::ClassFactory => {
                    Ok(ClassObject::Factory(Box::new(MockFactory { script: self.script.clone() })))
                }
                ClassIid::Provider => {
                    Ok(ClassObject::Provider(Box::new(MockProviderV2 {
                        script: self.script.clone(),
                    })))
                }
            }
        }

        fn can_unload_now(&self) -> bool {
            !self.script.refuse_unload.load(Ordering::Relaxed)
        }
    }

    struct MockLoader {
        script: Arc<ModuleScript>,
        loads: AtomicUsize,
        fail: AtomicBool,
    }

    impl MockLoader {
        fn new(script: Arc<ModuleScript>) -> MockLoader {
            MockLoader { script, loads: AtomicUsize::new(0), fail: AtomicBool::new(false) }
        }
    }

    impl ModuleLoader for MockLoader {
        fn load(&self, _path: &str) -> NdResult<Arc<dyn ProviderModule>> {
            self.loads.fetch_add(1, Ordering::Relaxed);
            if self.fail.load(Ordering::Relaxed) {
                return Err(NdError::unsuccessful("no such module"));
            }
            Ok(Arc::new(MockModule { script: self.script.clone() }))
        }
    }

    struct MockCatalog {
        path: String,
    }

    impl ProviderCatalog for MockCatalog {
        fn entries(&self) -> NdResult<Vec<CatalogEntry>> {
            Ok(Vec::new())
        }

        fn provider_path(&self, _id: &ProviderId) -> NdResult<String> {
            Ok(self.path.clone())
        }
    }

    fn test_id() -> ProviderId {
        "52cb6aac-0112-4428-93b6-eb25e6b7a0e2".parse().unwrap()
    }

    fn v4_sockaddr(text: &str) -> SockAddr {
        SockAddr::from(text.parse::<SocketAddr>().unwrap())
    }

    fn test_provider(
        generation: ProviderGeneration,
    ) -> (Provider, Arc<ModuleScript>, Arc<MockLoader>) {
        let script = Arc::new(ModuleScript::default());
        let loader = Arc::new(MockLoader::new(script.clone()));
        let catalog = MockCatalog { path: "/opt/nd/libmock.so".to_string() };
        let provider =
            Provider::init(&catalog, test_id(), generation, loader.clone()).unwrap();
        (provider, script, loader)
    }

    #[test]
    fn test_init_expands_environment() {
        std::env::set_var("ND_TEST_LIBDIR", "/opt/nd");
        let loader = Arc::new(MockLoader::new(Arc::new(ModuleScript::default())));

        let catalog = MockCatalog { path: "${ND_TEST_LIBDIR}/libprov.so".to_string() };
        let provider =
            Provider::init(&catalog, test_id(), ProviderGeneration::V2, loader.clone()).unwrap();
        assert_eq!(provider.path(), "/opt/nd/libprov.so");
        assert!(provider.is_active());

        // Unknown variables are kept as written.
        let catalog = MockCatalog { path: "${ND_TEST_NOT_SET_ANYWHERE}/x.so".to_string() };
        let provider =
            Provider::init(&catalog, test_id(), ProviderGeneration::V2, loader.clone()).unwrap();
        assert_eq!(provider.path(), "${ND_TEST_NOT_SET_ANYWHERE}/x.so");

        let catalog = MockCatalog { path: "${ND_TEST_LIBDIR/unterminated.so".to_string() };
        assert!(Provider::init(&catalog, test_id(), ProviderGeneration::V2, loader).is_err());
    }

    #[test]
    fn test_module_loaded_once_while_held() {
        let (provider, script, loader) = test_provider(ProviderGeneration::V2);
        script.refuse_unload.store(true, Ordering::Relaxed);

        assert!(provider.query_address_list(Some(&mut [0u8; 64])).is_ok());
        assert!(provider.query_address_list(Some(&mut [0u8; 64])).is_ok());
        assert_eq!(loader.loads.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_module_released_between_uses() {
        let (provider, _script, loader) = test_provider(ProviderGeneration::V2);

        assert!(provider.query_address_list(Some(&mut [0u8; 64])).is_ok());
        assert!(provider.query_address_list(Some(&mut [0u8; 64])).is_ok());
        assert_eq!(loader.loads.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_try_unload_respects_module_consent() {
        let (provider, script, _loader) = test_provider(ProviderGeneration::V2);

        // Nothing loaded yet, so there is nothing to keep around.
        assert!(provider.try_unload());

        script.refuse_unload.store(true, Ordering::Relaxed);
        assert!(provider.query_address_list(Some(&mut [0u8; 64])).is_ok());
        assert!(!provider.try_unload());

        script.refuse_unload.store(false, Ordering::Relaxed);
        assert!(provider.try_unload());
        assert!(provider.try_unload());
    }

    #[test]
    fn test_v1_open_checks_interface_before_loading() {
        let (provider, _script, loader) = test_provider(ProviderGeneration::V1);
        let addr = v4_sockaddr("10.1.2.3:0");

        assert!(matches!(
            provider.open_adapter(InterfaceId::AdapterV2, addr.as_bytes()),
            Err(NdError::InvalidParameter(_))
        ));
        assert_eq!(loader.loads.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_v1_open_reaches_the_provider() {
        let (provider, script, _loader) = test_provider(ProviderGeneration::V1);
        let addr = v4_sockaddr("10.1.2.3:0");

        assert!(provider.open_adapter(InterfaceId::AdapterV1, addr.as_bytes()).is_ok());
        assert_eq!(script.opened.lock().as_slice(), &[addr.as_bytes().to_vec()]);
    }

    #[test]
    fn test_v2_open_resolves_then_opens() {
        let (provider, script, _loader) = test_provider(ProviderGeneration::V2);
        let addr = v4_sockaddr("10.1.2.3:0");

        assert!(provider.open_adapter(InterfaceId::AdapterV2, addr.as_bytes()).is_ok());
        assert_eq!(script.resolved.lock().as_slice(), &[addr.as_bytes().to_vec()]);
        assert_eq!(script.opened_ids.lock().as_slice(), &[7]);
    }

    #[test]
    fn test_interface_failures_open_as_invalid_address() {
        let addr = v4_sockaddr("10.1.2.3:0");

        for generation in [ProviderGeneration::V1, ProviderGeneration::V2] {
            let (provider, script, _loader) = test_provider(generation);
            script.fail_class_object.store(true, Ordering::Relaxed);
            let iid = match generation {
                ProviderGeneration::V1 => InterfaceId::AdapterV1,
                ProviderGeneration::V2 => InterfaceId::AdapterV2,
            };
            assert!(matches!(
                provider.open_adapter(iid, addr.as_bytes()),
                Err(NdError::InvalidAddress)
            ));
        }

        let (provider, script, _loader) = test_provider(ProviderGeneration::V2);
        script.fail_resolve.store(true, Ordering::Relaxed);
        assert!(matches!(
            provider.open_adapter(InterfaceId::AdapterV2, addr.as_bytes()),
            Err(NdError::InvalidAddress)
        ));
    }

    #[test]
    fn test_provider_open_failure_reads_as_invalid_address() {
        let (provider, script, _loader) = test_provider(ProviderGeneration::V2);
        script.fail_open.store(true, Ordering::Relaxed);
        let addr = v4_sockaddr("10.1.2.3:0");

        assert!(matches!(
            provider.open_adapter(InterfaceId::AdapterV2, addr.as_bytes()),
            Err(NdError::InvalidAddress)
        ));
    }

    #[test]
    fn test_query_failures_map_to_not_ready() {
        let (provider, script, _loader) = test_provider(ProviderGeneration::V1);
        script.fail_class_object.store(true, Ordering::Relaxed);
        let err = provider.query_address_list(None).unwrap_err();
        assert!(matches!(err, NdError::NotReady));

        let (provider, _script, loader) = test_provider(ProviderGeneration::V2);
        loader.fail.store(true, Ordering::Relaxed);
        let err = provider.query_address_list(None).unwrap_err();
        assert!(matches!(err, NdError::NotReady));
    }

    #[test]
    fn test_query_address_list_sizing_and_contents() {
        let (provider, script, _loader) = test_provider(ProviderGeneration::V2);
        let addr = v4_sockaddr("10.1.2.3:0");
        script.addresses.lock().push(addr);

        let required = provider.query_address_list(None).unwrap_err();
        assert_eq!(required.required_size(), Some(28));

        let mut buf = vec![0u8; 28];
        assert_eq!(provider.query_address_list(Some(&mut buf)).unwrap(), 28);
        let view = AddressListView::parse(&buf).unwrap();
        assert_eq!(view.len(), 1);
        assert!(addr.matches(view.get(0).unwrap()));
    }
}

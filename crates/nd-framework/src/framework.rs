//! The provider registry and its address tables.
//!
//! The registry keeps one provider list and two address tables, one per
//! interface generation. Nothing is watched in the background on the
//! registry's behalf: change sources post events into a queue, and every
//! public operation drains that queue before answering, so callers always
//! see tables that reflect the catalog and addresses at call time.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use nd_provider::{
    Adapter, DylibLoader, FileCatalog, InterfaceId, ModuleLoader, Provider, ProviderCatalog,
    ProviderGeneration,
};
use nd_types::{
    AddressListView, NdError, NdResult, QueryFlags, SockAddr, validate_sockaddr, write_list,
};

use crate::config::FrameworkConfig;
use crate::notify::{
    ChangeKind, ChangeMonitor, EventQueue, Notifier, NullMonitor, PollingFileMonitor,
};
use crate::route::{RouteQuery, SystemRoute};

/// One table row tying a local address to the provider serving it.
struct AddressEntry {
    sockaddr: SockAddr,
    provider: Arc<Provider>,
}

#[derive(Default)]
struct Tables {
    providers: Vec<Arc<Provider>>,
    v1_addrs: Vec<AddressEntry>,
    v2_addrs: Vec<AddressEntry>,
}

/// Collaborators the registry is wired from.
pub struct FrameworkDeps {
    pub catalog: Arc<dyn ProviderCatalog>,
    pub loader: Arc<dyn ModuleLoader>,
    pub route: Arc<dyn RouteQuery>,
    pub catalog_monitor: Arc<dyn ChangeMonitor>,
    pub address_monitor: Arc<dyn ChangeMonitor>,
}

pub struct Framework {
    catalog: Arc<dyn ProviderCatalog>,
    loader: Arc<dyn ModuleLoader>,
    route: Arc<dyn RouteQuery>,
    catalog_monitor: Arc<dyn ChangeMonitor>,
    address_monitor: Arc<dyn ChangeMonitor>,
    queue: EventQueue,
    tables: Mutex<Tables>,
    refs: AtomicUsize,
}

impl Framework {
    /// Production wiring: the TOML catalog, dynamic module loading, OS
    /// routing queries, and a polling watch on the catalog file.
    pub fn new(config: &FrameworkConfig) -> NdResult<Framework> {
        let queue = EventQueue::new();
        let catalog_monitor = PollingFileMonitor::spawn(
            config.catalog_path.clone(),
            config.poll_interval(),
            queue.notifier(ChangeKind::ProviderCatalog),
        );
        let deps = FrameworkDeps {
            catalog: Arc::new(FileCatalog::new(config.catalog_path.clone())),
            loader: Arc::new(DylibLoader),
            route: Arc::new(SystemRoute),
            catalog_monitor: Arc::new(catalog_monitor),
            address_monitor: Arc::new(NullMonitor),
        };
        Framework::with_deps(queue, deps)
    }

    /// Wires the registry from explicit collaborators. Arms the address
    /// monitor and seeds the queue with a catalog event, so the next call
    /// that consults the registry rebuilds it first.
    pub fn with_deps(queue: EventQueue, deps: FrameworkDeps) -> NdResult<Framework> {
        let framework = Framework {
            catalog: deps.catalog,
            loader: deps.loader,
            route: deps.route,
            catalog_monitor: deps.catalog_monitor,
            address_monitor: deps.address_monitor,
            queue,
            tables: Mutex::new(Tables::default()),
            refs: AtomicUsize::new(0),
        };
        framework.address_monitor.arm()?;
        framework.queue.post(ChangeKind::ProviderCatalog);
        Ok(framework)
    }

    pub fn add_ref(&self) -> usize {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn release(&self) -> usize {
        self.refs.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// A handle for reporting changes the registry has no monitor for.
    pub fn change_notifier(&self, kind: ChangeKind) -> Notifier {
        self.queue.notifier(kind)
    }

    /// Drains pending change events. Each event re-arms its source before
    /// the tables are rebuilt under the lock, so a change racing with the
    /// rebuild fires a fresh event instead of getting lost.
    fn process_updates(&self) {
        while let Some(kind) = self.queue.try_next() {
            let monitor = match kind {
                ChangeKind::ProviderCatalog => &self.catalog_monitor,
                ChangeKind::AddressList => &self.address_monitor,
            };
            if let Err(err) = monitor.arm() {
                tracing::warn!("Failed to re-arm the {} monitor: {}", kind, err);
            }

            let mut tables = self.tables.lock();
            match kind {
                ChangeKind::ProviderCatalog => {
                    if self.rebuild_providers(&mut tables) {
                        self.rebuild_addresses(&mut tables);
                    }
                }
                ChangeKind::AddressList => self.rebuild_addresses(&mut tables),
            }
            Self::flush_providers(&mut tables.providers);
        }
    }

    /// Rebuilds the provider list from the catalog. Returns whether the
    /// catalog could be enumerated; the address tables are only rebuilt on
    /// top of a successful enumeration.
    fn rebuild_providers(&self, tables: &mut Tables) -> bool {
        let entries = match self.catalog.entries() {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("Provider catalog enumeration failed: {}", err);
                return false;
            }
        };

        for provider in &tables.providers {
            provider.set_active(false);
        }

        for entry in entries {
            let generation = match entry.networkdirect_generation() {
                Some(generation) => generation,
                None => continue,
            };

            // Multi-family registrations share one provider id; matching by
            // id alone makes the second row re-activate instead of
            // duplicating the provider.
            if let Some(known) = tables.providers.iter().find(|p| *p.id() == entry.provider_id) {
                known.set_active(true);
                continue;
            }

            match Provider::init(
                self.catalog.as_ref(),
                entry.provider_id,
                generation,
                self.loader.clone(),
            ) {
                Ok(provider) => {
                    tracing::info!(
                        "Registered {} provider {} at {}",
                        generation,
                        entry.provider_id,
                        provider.path()
                    );
                    tables.providers.push(Arc::new(provider));
                }
                Err(err) => {
                    tracing::warn!("Skipping provider {}: {}", entry.provider_id, err);
                }
            }
        }
        true
    }

    /// Rebuilds both address tables by querying every active provider. The
    /// scratch buffer grows at most once per provider; a provider that still
    /// cannot answer is skipped until the next change event.
    fn rebuild_addresses(&self, tables: &mut Tables) {
        let Tables { providers, v1_addrs, v2_addrs } = tables;
        v1_addrs.clear();
        v2_addrs.clear();

        let mut buf: Vec<u8> = Vec::new();
        for provider in providers.iter().filter(|p| p.is_active()) {
            let written = match provider.query_address_list(Some(buf.as_mut_slice())) {
                Ok(written) => written,
                Err(NdError::BufferOverflow { required }) => {
                    buf.resize(required, 0);
                    match provider.query_address_list(Some(buf.as_mut_slice())) {
                        Ok(written) => written,
                        Err(err) => {
                            tracing::debug!(
                                "Provider {} address query failed: {}",
                                provider.id(),
                                err
                            );
                            continue;
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!("Provider {} address query failed: {}", provider.id(), err);
                    continue;
                }
            };
            if written == 0 {
                continue;
            }

            let view = match AddressListView::parse(&buf[..written]) {
                Ok(view) => view,
                Err(err) => {
                    tracing::warn!(
                        "Provider {} returned a malformed address list: {}",
                        provider.id(),
                        err
                    );
                    continue;
                }
            };

            let table = match provider.generation() {
                ProviderGeneration::V1 => &mut *v1_addrs,
                ProviderGeneration::V2 => &mut *v2_addrs,
            };
            for addr in view.addrs() {
                match addr {
                    Ok(sockaddr) => {
                        table.push(AddressEntry { sockaddr, provider: provider.clone() })
                    }
                    Err(err) => tracing::debug!(
                        "Skipping a malformed address from provider {}: {}",
                        provider.id(),
                        err
                    ),
                }
            }
        }
    }

    /// Asks every provider to drop its module, then removes the ones that
    /// are both unloaded and no longer in the catalog.
    fn flush_providers(providers: &mut Vec<Arc<Provider>>) {
        providers.retain(|provider| {
            let unloaded = provider.try_unload();
            if unloaded && !provider.is_active() {
                tracing::info!("Removed provider {}", provider.id());
                false
            } else {
                true
            }
        });
    }

    /// Lists the local addresses served by registered providers, newest
    /// interface generation first. An empty list reports zero bytes written
    /// no matter what buffer was passed.
    pub fn query_address_list(
        &self,
        flags: QueryFlags,
        out: Option<&mut [u8]>,
    ) -> NdResult<usize> {
        self.process_updates();
        let tables = self.tables.lock();

        let mut addrs: Vec<SockAddr> = Vec::new();
        if !flags.contains(QueryFlags::EXCLUDE_V2) {
            addrs.extend(tables.v2_addrs.iter().map(|entry| entry.sockaddr));
        }
        if !flags.contains(QueryFlags::EXCLUDE_V1) {
            addrs.extend(tables.v1_addrs.iter().map(|entry| entry.sockaddr));
        }
        write_list(&addrs, out)
    }

    /// Writes into `out` the local address the host would use to reach
    /// `remote`, provided a registered provider serves that local address.
    pub fn resolve_address(&self, remote: &[u8], out: &mut [u8]) -> NdResult<usize> {
        let remote = SockAddr::from_bytes(remote)?;

        self.process_updates();
        let tables = self.tables.lock();

        let local = self.route.local_for(&remote)?;
        if out.len() < local.len() {
            return Err(NdError::BufferOverflow { required: local.len() });
        }

        let supported = tables
            .v2_addrs
            .iter()
            .chain(tables.v1_addrs.iter())
            .any(|entry| entry.sockaddr.matches(local.as_bytes()));
        if !supported {
            return Err(NdError::InvalidAddress);
        }
        Ok(local.copy_to(out))
    }

    /// Whether some registered provider serves `address`.
    pub fn check_address(&self, address: &[u8]) -> NdResult<()> {
        validate_sockaddr(address)?;

        self.process_updates();
        let tables = self.tables.lock();

        let served = tables
            .v2_addrs
            .iter()
            .chain(tables.v1_addrs.iter())
            .any(|entry| entry.sockaddr.matches(address));
        if served {
            Ok(())
        } else {
            Err(NdError::InvalidAddress)
        }
    }

    /// Opens an adapter for `address` through the generation selected by
    /// `iid`. When several providers serve the address the first one that
    /// succeeds wins; if none does, the address reads as invalid.
    pub fn open_adapter(&self, iid: InterfaceId, address: &[u8]) -> NdResult<Box<dyn Adapter>> {
        validate_sockaddr(address)?;

        self.process_updates();
        let tables = self.tables.lock();

        let table = match iid {
            InterfaceId::AdapterV1 => &tables.v1_addrs,
            InterfaceId::AdapterV2 => &tables.v2_addrs,
        };

        // Another provider may serve the same address, so failed opens fall
        // through to the next matching entry.
        for entry in table.iter().filter(|entry| entry.sockaddr.matches(address)) {
            if let Ok(adapter) = entry.provider.open_adapter(iid, address) {
                return Ok(adapter);
            }
        }
        Err(NdError::InvalidAddress)
    }

    /// Unloads idle modules and drops providers that left the catalog,
    /// without draining pending events first.
    pub fn flush_providers_for_user(&self) {
        let mut tables = self.tables.lock();
        Self::flush_providers(&mut tables.providers);
    }
}

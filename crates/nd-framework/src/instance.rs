//! The process-wide framework instance and the public entry points.
//!
//! The framework is started and stopped by reference count: every
//! successful [`startup`] must be paired with a [`cleanup`], and the
//! instance is torn down when the last reference is released.

use std::sync::Arc;

use parking_lot::Mutex;

use nd_provider::{Adapter, InterfaceId};
use nd_types::{NdError, NdResult, QueryFlags};

use crate::config::FrameworkConfig;
use crate::framework::Framework;

static INSTANCE: Mutex<Option<Arc<Framework>>> = Mutex::new(None);

/// Starts the framework with default configuration, or joins the running
/// instance.
pub fn startup() -> NdResult<()> {
    startup_with(&FrameworkConfig::default())
}

/// Starts the framework from `config`, or joins the running instance.
/// The configuration of an already-running instance is left alone.
pub fn startup_with(config: &FrameworkConfig) -> NdResult<()> {
    let mut instance = INSTANCE.lock();
    let framework = match instance.as_ref() {
        Some(framework) => framework.clone(),
        None => {
            let framework = Arc::new(Framework::new(config)?);
            *instance = Some(framework.clone());
            tracing::info!(
                "NetworkDirect framework started, catalog at {}",
                config.catalog_path.display()
            );
            framework
        }
    };
    framework.add_ref();
    Ok(())
}

/// Releases one framework reference, stopping the instance when the last
/// one goes away.
pub fn cleanup() -> NdResult<()> {
    let mut instance = INSTANCE.lock();
    let framework = instance.as_ref().ok_or(NdError::NotReady)?;
    if framework.release() == 0 {
        *instance = None;
        tracing::info!("NetworkDirect framework stopped");
    }
    Ok(())
}

fn current() -> NdResult<Arc<Framework>> {
    INSTANCE.lock().as_ref().cloned().ok_or(NdError::NotReady)
}

pub fn query_address_list(flags: QueryFlags, out: Option<&mut [u8]>) -> NdResult<usize> {
    current()?.query_address_list(flags, out)
}

pub fn resolve_address(remote: &[u8], out: &mut [u8]) -> NdResult<usize> {
    current()?.resolve_address(remote, out)
}

pub fn check_address(address: &[u8]) -> NdResult<()> {
    current()?.check_address(address)
}

pub fn open_adapter(iid: InterfaceId, address: &[u8]) -> NdResult<Box<dyn Adapter>> {
    current()?.open_adapter(iid, address)
}

pub fn open_v1_adapter(address: &[u8]) -> NdResult<Box<dyn Adapter>> {
    open_adapter(InterfaceId::AdapterV1, address)
}

/// Unloads idle provider modules. Does nothing when the framework is not
/// running.
pub fn flush_providers() {
    let framework = INSTANCE.lock().as_ref().cloned();
    if let Some(framework) = framework {
        framework.flush_providers_for_user();
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use nd_types::SockAddr;

    use super::*;

    // The tests below share the process-wide instance.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn test_config(name: &str) -> FrameworkConfig {
        FrameworkConfig {
            catalog_path: std::env::temp_dir().join(name),
            poll_interval_ms: 50,
        }
    }

    fn v4_bytes() -> Vec<u8> {
        SockAddr::from("10.0.0.1:0".parse::<SocketAddr>().unwrap()).as_bytes().to_vec()
    }

    #[test]
    fn test_lifecycle_refcounts() {
        let _guard = TEST_LOCK.lock();
        assert!(matches!(cleanup(), Err(NdError::NotReady)));

        let config = test_config("nd-test-instance-lifecycle.toml");
        startup_with(&config).unwrap();
        startup_with(&config).unwrap();

        // No catalog file means no providers, which is a valid empty state.
        assert_eq!(query_address_list(QueryFlags::default(), None).unwrap(), 0);

        cleanup().unwrap();
        // The second reference keeps the instance alive.
        assert_eq!(query_address_list(QueryFlags::default(), None).unwrap(), 0);

        cleanup().unwrap();
        assert!(matches!(cleanup(), Err(NdError::NotReady)));
        assert!(matches!(
            query_address_list(QueryFlags::default(), None),
            Err(NdError::NotReady)
        ));
    }

    #[test]
    fn test_entry_points_require_startup() {
        let _guard = TEST_LOCK.lock();
        let addr = v4_bytes();
        let mut out = [0u8; 28];

        assert!(matches!(check_address(&addr), Err(NdError::NotReady)));
        assert!(matches!(resolve_address(&addr, &mut out), Err(NdError::NotReady)));
        assert!(matches!(
            open_adapter(InterfaceId::AdapterV2, &addr),
            Err(NdError::NotReady)
        ));
        assert!(matches!(open_v1_adapter(&addr), Err(NdError::NotReady)));
    }

    #[test]
    fn test_flush_without_instance_is_silent() {
        let _guard = TEST_LOCK.lock();
        flush_providers();
        assert!(matches!(check_address(&v4_bytes()), Err(NdError::NotReady)));
    }
}

//! Dynamic loading of provider modules.
//!
//! A provider module is a shared library exporting two C symbols:
//!
//! * `nd_class_object(iid, out)` allocates the class object for `iid` and
//!   writes a raw `Box<ClassObject>` pointer into `out`. Ownership of the
//!   box transfers to the caller.
//! * `nd_can_unload_now()` reports whether the module holds no live objects.
//!
//! Both return a status code, `0` meaning success. The boxed transfer is a
//! same-toolchain contract between the framework and modules built against
//! this crate.

use std::os::raw::c_void;
use std::sync::Arc;

use nd_types::{NdError, NdResult};

use crate::api::{ClassIid, ClassObject};

pub const CLASS_OBJECT_SYMBOL: &[u8] = b"nd_class_object";
pub const CAN_UNLOAD_SYMBOL: &[u8] = b"nd_can_unload_now";

pub const STATUS_OK: i32 = 0;
pub const STATUS_NO_MEMORY: i32 = 1;
pub const STATUS_NO_INTERFACE: i32 = 2;

pub type ClassObjectFn = unsafe extern "C" fn(iid: u32, out: *mut *mut c_void) -> i32;
pub type CanUnloadFn = unsafe extern "C" fn() -> i32;

fn status_error(status: i32) -> NdError {
    match status {
        STATUS_NO_MEMORY => NdError::NoMemory,
        STATUS_NO_INTERFACE => NdError::InvalidParameter("unsupported class interface id"),
        _ => NdError::unsuccessful(format!("module returned status {}", status)),
    }
}

/// A loaded provider module.
pub trait ProviderModule: Send + Sync {
    /// Asks the module for the class object registered under `iid`.
    fn class_object(&self, iid: ClassIid) -> NdResult<ClassObject>;

    /// Whether the module consents to being unloaded.
    fn can_unload_now(&self) -> bool;
}

/// Maps a module path to a loaded module.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &str) -> NdResult<Arc<dyn ProviderModule>>;
}

/// A provider module backed by a shared library.
pub struct DylibModule {
    class_object_fn: ClassObjectFn,
    can_unload_fn: CanUnloadFn,
    // Keeps the mapped library alive for as long as the fn pointers are used.
    _library: libloading::Library,
}

impl DylibModule {
    /// Loads the library at `path` and resolves both entry points.
    /// Either symbol missing is a load failure.
    pub fn open(path: &str) -> NdResult<DylibModule> {
        let library = unsafe { libloading::Library::new(path) }
            .map_err(|err| NdError::unsuccessful(format!("failed to load {}: {}", path, err)))?;
        let class_object_fn = unsafe {
            *library.get::<ClassObjectFn>(CLASS_OBJECT_SYMBOL).map_err(|err| {
                NdError::unsuccessful(format!("{}: missing class object entry: {}", path, err))
            })?
        };
        let can_unload_fn = unsafe {
            *library.get::<CanUnloadFn>(CAN_UNLOAD_SYMBOL).map_err(|err| {
                NdError::unsuccessful(format!("{}: missing unload entry: {}", path, err))
            })?
        };
        Ok(DylibModule { class_object_fn, can_unload_fn, _library: library })
    }
}

impl ProviderModule for DylibModule {
    fn class_object(&self, iid: ClassIid) -> NdResult<ClassObject> {
        let mut raw: *mut c_void = std::ptr::null_mut();
        let status = unsafe { (self.class_object_fn)(iid.into(), &mut raw) };
        if status != STATUS_OK {
            return Err(status_error(status));
        }
        if raw.is_null() {
            return Err(NdError::unsuccessful("module produced a null class object"));
        }
        Ok(*unsafe { Box::from_raw(raw.cast::<ClassObject>()) })
    }

    fn can_unload_now(&self) -> bool {
        unsafe { (self.can_unload_fn)() == STATUS_OK }
    }
}

/// The production loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct DylibLoader;

impl ModuleLoader for DylibLoader {
    fn load(&self, path: &str) -> NdResult<Arc<dyn ProviderModule>> {
        Ok(Arc::new(DylibModule::open(path)?))
    }
}

//! The NetworkDirect-style provider framework: a registry of dynamically
//! loaded providers, the address tables built from them, and the entry
//! points callers use to list, check, resolve, and open local RDMA-capable
//! addresses.

pub mod config;
pub mod framework;
pub mod instance;
pub mod notify;
pub mod route;

pub use config::FrameworkConfig;
pub use framework::{Framework, FrameworkDeps};
pub use instance::{
    check_address, cleanup, flush_providers, open_adapter, open_v1_adapter, query_address_list,
    resolve_address, startup, startup_with,
};
pub use notify::{ChangeKind, ChangeMonitor, EventQueue, Notifier, NullMonitor, PollingFileMonitor};
pub use route::{RouteQuery, SystemRoute};

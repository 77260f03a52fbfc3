//! Service discovery on top of the coordination store
//!
//! - [`MembershipMonitor`]: follows a service directory and keeps one
//!   [`BackendHandle`] per address
//! - [`RoundRobinRouter`] / [`HashRouter`]: pick a live backend per request
//! - [`SelfRegistrar`]: publishes this process's own addresses
//! - [`DiscoveryNode`]: all of the above plus the admin HTTP surface

pub mod backend;
pub mod handle;
pub mod http;
pub mod monitor;
pub mod registrar;
pub mod router;
pub mod server;

pub use backend::{AddrBackend, AddrBackendFactory, BackendClient, BackendFactory};
pub use handle::{BackendHandle, HandleStatus};
pub use http::{create_router, AdminState, AdminStatus, RegistrarStatus, StatusSource};
pub use monitor::{DiffReport, MembershipMonitor, MonitorStatus, RoutingSnapshot, SnapshotCell};
pub use registrar::SelfRegistrar;
pub use router::{HashRouter, RoundRobinRouter};
pub use server::DiscoveryNode;

//! Coordination store access
//!
//! A hierarchical namespace with persistent and ephemeral nodes, one-shot
//! children watches and session events. [`CoordinationClient`] is the only
//! entry point the rest of the crate uses. [`MemoryStore`] is the in-process
//! backend; `ZkConnector` talks to a ZooKeeper ensemble when the `zookeeper`
//! feature is enabled.

pub mod client;
pub mod memory;
pub mod store;
pub mod watcher;
#[cfg(feature = "zookeeper")]
pub mod zk;

pub use client::{CoordinationClient, RebuildCallback};
pub use memory::{CreateRecord, MemoryStore};
pub use store::{
    Connector, CreateMode, SessionEvent, SessionEvents, StoreConn, WatchEvent, WatchTrigger,
};
pub use watcher::{DirectoryWatcher, WATCH_RETRY_BACKOFF};
#[cfg(feature = "zookeeper")]
pub use zk::ZkConnector;

use crate::common::{Result, StoreBackend, StoreConfig};
use std::sync::Arc;

/// Connector for the configured store backend
pub fn connector_for(config: &StoreConfig) -> Result<Arc<dyn Connector>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "zookeeper")]
        StoreBackend::Zookeeper => Ok(Arc::new(ZkConnector)),
        #[cfg(not(feature = "zookeeper"))]
        StoreBackend::Zookeeper => Err(crate::common::Error::InvalidConfig(
            "store.backend = \"zookeeper\" needs the `zookeeper` feature".into(),
        )),
    }
}

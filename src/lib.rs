//! # miniroute
//!
//! Client-side service discovery and load balancing over a hierarchical
//! coordination store:
//! - Session management with automatic re-registration on session rebuild
//! - Restartable directory watches with error reporting and backoff
//! - Membership tracking with one long-lived backend client per address
//! - Lock-free round-robin and hash routing over published snapshots
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            ┌────────────────────────┐
//!            │   Coordination store   │
//!            │  /redis/10.0.0.1:6379  │
//!            │  /redis/10.0.0.2:6379  │
//!            └───▲───────────────┬────┘
//!   ephemeral    │               │ children watch
//!   nodes        │               │
//! ┌──────────────┴──┐   ┌────────▼─────────┐
//! │  SelfRegistrar   │   │ DirectoryWatcher │
//! └──────────────────┘   └────────┬─────────┘
//!                                 │ snapshots
//!                       ┌─────────▼─────────┐
//!                       │ MembershipMonitor │
//!                       └─────────┬─────────┘
//!                                 │ RoutingSnapshot (atomic swap)
//!                  ┌──────────────┴──────────────┐
//!          ┌───────▼────────┐           ┌────────▼───────┐
//!          │RoundRobinRouter│           │   HashRouter   │
//!          └────────────────┘           └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Run a standalone discovery node
//! ```bash
//! miniroute serve --config ./miniroute.toml
//! ```
//!
//! ### Inspect a running node
//! ```bash
//! miniroute status --admin http://127.0.0.1:7070
//! ```

pub mod common;
pub mod coordination;
pub mod discovery;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordination::{CoordinationClient, DirectoryWatcher, MemoryStore};
pub use discovery::{
    DiscoveryNode, HashRouter, MembershipMonitor, RoundRobinRouter, SelfRegistrar,
};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

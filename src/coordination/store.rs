//! Coordination store interface
//!
//! The store itself (its consensus, replication and session keep-alive) lives
//! outside this crate. A store backend plugs in through [`Connector`], which
//! opens a session and hands back a [`StoreConn`] plus the stream of session
//! state changes for that connection.

use crate::common::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Lifetime of a created node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Removed by the store when the creating session ends
    Ephemeral,
}

/// Session state transitions reported by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Disconnected,
    /// Transport is up, session not yet (re)established
    Connected,
    /// A session is active; ephemeral nodes created from now on belong to it
    HasSession,
    Expired,
}

/// Fired once by a children watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    ChildrenChanged,
    /// The watched node itself was deleted
    Deleted,
    Failed(String),
}

pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// One-shot trigger armed by [`StoreConn::children_watch`]
pub type WatchTrigger = oneshot::Receiver<WatchEvent>;

/// Opens sessions against a coordination store.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoints: &[String],
        session_timeout: Duration,
    ) -> Result<(Arc<dyn StoreConn>, SessionEvents)>;
}

/// Node operations on one store connection. Paths are absolute and normalised.
#[async_trait]
pub trait StoreConn: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Create a single node; the parent must already exist.
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Children of `path` plus a trigger that fires on the next change.
    async fn children_watch(&self, path: &str) -> Result<(Vec<String>, WatchTrigger)>;

    /// End the session. Its ephemeral nodes go away and the session event
    /// stream terminates.
    async fn close(&self);
}

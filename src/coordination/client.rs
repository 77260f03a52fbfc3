//! Coordination store client
//!
//! Owns one logical session. Node operations connect lazily, the session
//! event stream is consumed by a background task, and a rebuild callback
//! runs every time a session is (re)established so that callers can restore
//! their ephemeral nodes.

use crate::common::utils::{node_name, path_prefixes};
use crate::common::{normalize_path, Error, Result, StoreConfig};
use crate::coordination::store::{
    Connector, CreateMode, SessionEvent, SessionEvents, StoreConn, WatchTrigger,
};
use crate::coordination::watcher::DirectoryWatcher;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Invoked with the client after each session establishment
pub type RebuildCallback = Arc<dyn Fn(CoordinationClient) -> BoxFuture<'static, ()> + Send + Sync>;

struct ClientInner {
    endpoints: Vec<String>,
    session_timeout: Duration,
    connector: Arc<dyn Connector>,
    conn: RwLock<Option<Arc<dyn StoreConn>>>,
    connect_lock: tokio::sync::Mutex<()>,
    on_session_build: RwLock<Option<RebuildCallback>>,
    session_task: Mutex<Option<JoinHandle<()>>>,
    sessions_established: AtomicU64,
    closed: AtomicBool,
}

/// Handle to a coordination store session. Clones share the session.
#[derive(Clone)]
pub struct CoordinationClient {
    inner: Arc<ClientInner>,
}

impl CoordinationClient {
    pub fn new(
        endpoints: Vec<String>,
        session_timeout: Duration,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                endpoints,
                session_timeout,
                connector,
                conn: RwLock::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                on_session_build: RwLock::new(None),
                session_task: Mutex::new(None),
                sessions_established: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(config: &StoreConfig, connector: Arc<dyn Connector>) -> Self {
        Self::new(config.endpoints.clone(), config.session_timeout(), connector)
    }

    /// Establish the session and start consuming its events.
    /// A no-op when already connected.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("coordination client".into()));
        }
        if self.inner.conn.read().is_some() {
            return Ok(());
        }

        let (conn, events) = self
            .inner
            .connector
            .connect(&self.inner.endpoints, self.inner.session_timeout)
            .await
            .map_err(|e| match e {
                Error::ConnectionFailed(_) => e,
                other => Error::ConnectionFailed(other.to_string()),
            })?;
        *self.inner.conn.write() = Some(conn);

        let task = tokio::spawn(watch_session(Arc::downgrade(&self.inner), events));
        if let Some(previous) = self.inner.session_task.lock().replace(task) {
            previous.abort();
        }
        info!(endpoints = ?self.inner.endpoints, "Connected to coordination store");
        Ok(())
    }

    async fn conn(&self) -> Result<Arc<dyn StoreConn>> {
        let existing = self.inner.conn.read().clone();
        if let Some(conn) = existing {
            return Ok(conn);
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::NoConnection);
        }
        if let Err(e) = self.connect().await {
            error!(endpoints = ?self.inner.endpoints, error = %e, "Connect to coordination store failed");
            return Err(Error::NoConnection);
        }
        let conn = self.inner.conn.read().clone();
        conn.ok_or(Error::NoConnection)
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire) && self.inner.conn.read().is_some()
    }

    /// Number of session establishments handled so far (initial one included)
    pub fn sessions_established(&self) -> u64 {
        self.inner.sessions_established.load(Ordering::Acquire)
    }

    /// Replace the rebuild callback. Only the latest one fires.
    pub fn set_session_rebuild_callback<F, Fut>(&self, f: F)
    where
        F: Fn(CoordinationClient) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: RebuildCallback =
            Arc::new(move |client: CoordinationClient| -> BoxFuture<'static, ()> {
                Box::pin(f(client))
            });
        *self.inner.on_session_build.write() = Some(callback);
    }

    pub fn clear_session_rebuild_callback(&self) {
        self.inner.on_session_build.write().take();
    }

    /// Create `path`, creating missing persistent ancestors first. With
    /// `ephemeral` the last segment is bound to the current session;
    /// otherwise an existing node is left untouched.
    pub async fn create_node(&self, path: &str, ephemeral: bool) -> Result<()> {
        let path = normalize_path(path)?;
        let conn = self.conn().await?;

        let mut persistent = path_prefixes(&path);
        if ephemeral {
            persistent.pop();
        }
        for segment in &persistent {
            if conn.exists(segment).await? {
                continue;
            }
            match conn
                .create(segment, node_name(segment).as_bytes(), CreateMode::Persistent)
                .await
            {
                // Another client won the race for this segment
                Ok(()) | Err(Error::NodeExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if ephemeral {
            conn.create(&path, b"", CreateMode::Ephemeral).await?;
            debug!(path = %path, "Created ephemeral node");
        }
        Ok(())
    }

    pub async fn create_persistent_node(&self, path: &str) -> Result<()> {
        self.create_node(path, false).await
    }

    pub async fn create_ephemeral_node(&self, path: &str) -> Result<()> {
        self.create_node(path, true).await
    }

    pub async fn node_exists(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path)?;
        self.conn().await?.exists(&path).await
    }

    pub async fn delete_node(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        self.conn().await?.delete(&path).await
    }

    pub async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let path = normalize_path(path)?;
        self.conn().await?.children(&path).await
    }

    /// Children of `path` and a one-shot trigger for the next change
    pub async fn watch_children_once(&self, path: &str) -> Result<(Vec<String>, WatchTrigger)> {
        let path = normalize_path(path)?;
        self.conn().await?.children_watch(&path).await
    }

    /// Continuously watch the children of `path`.
    pub async fn watch_dir(&self, path: &str, retry: Duration) -> Result<DirectoryWatcher> {
        let path = normalize_path(path)?;
        if let Err(e) = self.conn().await {
            error!(path = %path, error = %e, "Watch dir failed");
            return Err(e);
        }
        Ok(DirectoryWatcher::spawn(self.clone(), path, retry))
    }

    /// Release the session. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Coordination client close");
        self.clear_session_rebuild_callback();
        if let Some(task) = self.inner.session_task.lock().take() {
            task.abort();
        }
        let conn = self.inner.conn.write().take();
        if let Some(conn) = conn {
            conn.close().await;
        }
    }
}

async fn watch_session(inner: Weak<ClientInner>, mut events: SessionEvents) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Disconnected => error!(?event, "Session disconnected"),
            SessionEvent::HasSession => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                debug!(?event, "Session established");
                let callback = inner.on_session_build.read().clone();
                if let Some(callback) = callback {
                    callback(CoordinationClient {
                        inner: inner.clone(),
                    })
                    .await;
                }
                inner.sessions_established.fetch_add(1, Ordering::AcqRel);
            }
            other => debug!(event = ?other, "Session event"),
        }
    }
    info!("Session event stream closed");
}

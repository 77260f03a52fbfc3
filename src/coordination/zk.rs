//! ZooKeeper store backend
//!
//! Wraps the blocking `zookeeper` client. Every call runs on the blocking
//! pool. Client state changes are translated into [`SessionEvent`]s; when the
//! session is closed by the ensemble (expiry) a fresh one is opened in the
//! background and reported as `Connected` then `HasSession`.

use crate::common::{Error, Result};
use crate::coordination::store::{
    Connector, CreateMode, SessionEvent, SessionEvents, StoreConn, WatchEvent, WatchTrigger,
};
use ::zookeeper::{Acl, WatchedEvent, WatchedEventType, ZkError, ZkState, ZooKeeper};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const REOPEN_BACKOFF: Duration = Duration::from_millis(100);

type PendingWatch = Arc<Mutex<Option<oneshot::Sender<WatchEvent>>>>;

/// Session events for a client state change. `Closed` means the session
/// is gone; anything not connected counts as a disconnect.
fn session_events(state: &ZkState) -> &'static [SessionEvent] {
    match state {
        ZkState::Connected | ZkState::ConnectedReadOnly => {
            &[SessionEvent::Connected, SessionEvent::HasSession]
        }
        ZkState::Closed => &[SessionEvent::Expired],
        _ => &[SessionEvent::Disconnected],
    }
}

fn watch_event(event_type: &WatchedEventType) -> WatchEvent {
    match event_type {
        WatchedEventType::NodeChildrenChanged => WatchEvent::ChildrenChanged,
        WatchedEventType::NodeDeleted => WatchEvent::Deleted,
        other => WatchEvent::Failed(format!("unexpected watch event {:?}", other)),
    }
}

fn store_error(path: &str, err: ZkError) -> Error {
    match err {
        ZkError::NodeExists => Error::NodeExists(path.to_string()),
        ZkError::NoNode => Error::NoNode(path.to_string()),
        ZkError::NotEmpty => Error::NotEmpty(path.to_string()),
        ZkError::ConnectionLoss | ZkError::SessionExpired | ZkError::OperationTimeout => {
            Error::ConnectionFailed(format!("{:?} on {}", err, path))
        }
        other => Error::Store(format!("{:?} on {}", other, path)),
    }
}

struct Session {
    connect_string: String,
    session_timeout: Duration,
    keeper: RwLock<Option<Arc<ZooKeeper>>>,
    /// Bumped per opened client; state changes from older clients are ignored
    generation: AtomicU64,
    events: mpsc::UnboundedSender<SessionEvent>,
    pending: Mutex<Vec<PendingWatch>>,
    closed: AtomicBool,
    runtime: Handle,
}

impl Session {
    async fn open(self: &Arc<Self>) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let connect_string = self.connect_string.clone();
        let timeout = self.session_timeout;
        let keeper = tokio::task::spawn_blocking(move || {
            ZooKeeper::connect(&connect_string, timeout, |_: WatchedEvent| {})
        })
        .await
        .map_err(|e| Error::Internal(format!("connect task failed: {}", e)))?
        .map_err(|e| Error::ConnectionFailed(format!("{:?}", e)))?;

        let session = Arc::downgrade(self);
        keeper.add_listener(move |state: ZkState| {
            if let Some(session) = session.upgrade() {
                session.on_state(generation, state);
            }
        });

        *self.keeper.write() = Some(Arc::new(keeper));
        self.notify(&[SessionEvent::Connected, SessionEvent::HasSession]);
        Ok(())
    }

    fn on_state(self: &Arc<Self>, generation: u64, state: ZkState) {
        if self.closed.load(Ordering::Acquire)
            || generation != self.generation.load(Ordering::Acquire)
        {
            return;
        }
        debug!(?state, generation, "ZooKeeper state changed");
        if !matches!(state, ZkState::Connected | ZkState::ConnectedReadOnly) {
            self.fail_watches(&format!("connection state {:?}", state));
        }
        self.notify(session_events(&state));

        if matches!(state, ZkState::Closed) {
            warn!(servers = %self.connect_string, "ZooKeeper session closed, reopening");
            let session = self.clone();
            self.runtime.spawn(async move { session.reopen().await });
        }
    }

    async fn reopen(self: Arc<Self>) {
        let mut backoff = REOPEN_BACKOFF;
        while !self.closed.load(Ordering::Acquire) {
            match self.open().await {
                Ok(()) => {
                    info!(servers = %self.connect_string, "ZooKeeper session reopened");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, ?backoff, "Reopen ZooKeeper session failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.session_timeout);
                }
            }
        }
    }

    fn notify(&self, events: &[SessionEvent]) {
        for event in events {
            let _ = self.events.send(*event);
        }
    }

    fn track(&self, watch: PendingWatch) {
        let mut pending = self.pending.lock();
        pending.retain(|w| w.lock().as_ref().is_some_and(|tx| !tx.is_closed()));
        pending.push(watch);
    }

    fn fail_watches(&self, reason: &str) {
        let pending: Vec<PendingWatch> = self.pending.lock().drain(..).collect();
        for watch in pending {
            if let Some(tx) = watch.lock().take() {
                let _ = tx.send(WatchEvent::Failed(reason.to_string()));
            }
        }
    }

    fn keeper(&self) -> Result<Arc<ZooKeeper>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NoConnection);
        }
        self.keeper.read().clone().ok_or(Error::NoConnection)
    }

    async fn call<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ZooKeeper) -> Result<T> + Send + 'static,
    {
        let keeper = self.keeper()?;
        tokio::task::spawn_blocking(move || op(&keeper))
            .await
            .map_err(|e| Error::Internal(format!("store call failed to run: {}", e)))?
    }
}

/// Opens sessions against a ZooKeeper ensemble
#[derive(Debug, Clone, Copy, Default)]
pub struct ZkConnector;

#[async_trait]
impl Connector for ZkConnector {
    async fn connect(
        &self,
        endpoints: &[String],
        session_timeout: Duration,
    ) -> Result<(Arc<dyn StoreConn>, SessionEvents)> {
        if endpoints.is_empty() {
            return Err(Error::ConnectionFailed("no ZooKeeper endpoints".into()));
        }
        let runtime = Handle::try_current().map_err(|e| Error::Internal(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            connect_string: endpoints.join(","),
            session_timeout,
            keeper: RwLock::new(None),
            generation: AtomicU64::new(0),
            events: tx,
            pending: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            runtime,
        });
        session.open().await?;
        info!(servers = %session.connect_string, ?session_timeout, "ZooKeeper session opened");

        let conn: Arc<dyn StoreConn> = Arc::new(ZkConn { session });
        Ok((conn, rx))
    }
}

/// One ZooKeeper client, replaced underneath when its session expires
pub struct ZkConn {
    session: Arc<Session>,
}

#[async_trait]
impl StoreConn for ZkConn {
    async fn exists(&self, path: &str) -> Result<bool> {
        let path = path.to_string();
        self.session
            .call(move |zk| {
                zk.exists(&path, false)
                    .map(|stat| stat.is_some())
                    .map_err(|e| store_error(&path, e))
            })
            .await
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<()> {
        let path = path.to_string();
        let data = data.to_vec();
        let mode = match mode {
            CreateMode::Persistent => ::zookeeper::CreateMode::Persistent,
            CreateMode::Ephemeral => ::zookeeper::CreateMode::Ephemeral,
        };
        self.session
            .call(move |zk| {
                zk.create(&path, data, Acl::open_unsafe().clone(), mode)
                    .map(|_| ())
                    .map_err(|e| store_error(&path, e))
            })
            .await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.session
            .call(move |zk| zk.delete(&path, None).map_err(|e| store_error(&path, e)))
            .await
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let path = path.to_string();
        self.session
            .call(move |zk| {
                zk.get_children(&path, false)
                    .map_err(|e| store_error(&path, e))
            })
            .await
    }

    async fn children_watch(&self, path: &str) -> Result<(Vec<String>, WatchTrigger)> {
        let (tx, rx) = oneshot::channel();
        let watch: PendingWatch = Arc::new(Mutex::new(Some(tx)));
        self.session.track(watch.clone());

        let path = path.to_string();
        let children = self
            .session
            .call(move |zk| {
                zk.get_children_w(&path, move |event: WatchedEvent| {
                    if let Some(tx) = watch.lock().take() {
                        let _ = tx.send(watch_event(&event.event_type));
                    }
                })
                .map_err(|e| store_error(&path, e))
            })
            .await?;
        Ok((children, rx))
    }

    async fn close(&self) {
        if self.session.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.session.fail_watches("session closed");
        let keeper = self.session.keeper.write().take();
        let Some(keeper) = keeper else {
            return;
        };
        let closed = tokio::task::spawn_blocking(move || keeper.close()).await;
        match closed {
            Ok(Ok(())) => debug!(servers = %self.session.connect_string, "ZooKeeper session closed"),
            Ok(Err(e)) => warn!(error = ?e, "Close ZooKeeper session failed"),
            Err(e) => warn!(error = %e, "Close ZooKeeper session task failed"),
        }
    }
}

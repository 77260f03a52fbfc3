//! Self registration
//!
//! Publishes this process's own addresses as ephemeral nodes under a
//! service directory and puts them back after every session rebuild.

use crate::common::{child_path, normalize_path, Error, RegistrarConfig, Result};
use crate::coordination::CoordinationClient;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Serializes a create plus its tracking against session-build re-registration
type CreateLock = Arc<AsyncMutex<()>>;

struct RegisterRequest {
    addr: String,
    reply: oneshot::Sender<Result<()>>,
}

pub struct SelfRegistrar {
    client: CoordinationClient,
    path: String,
    addrs: Arc<Mutex<Vec<String>>>,
    requests: Mutex<Option<mpsc::Sender<RegisterRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SelfRegistrar {
    /// Must be called from within a tokio runtime.
    pub fn new(client: CoordinationClient, path: &str) -> Result<Self> {
        let path = normalize_path(path)?;
        let addrs = Arc::new(Mutex::new(Vec::new()));
        let create_lock: CreateLock = Arc::new(AsyncMutex::new(()));

        let rebuild_path = path.clone();
        let rebuild_addrs = addrs.clone();
        let rebuild_lock = create_lock.clone();
        client.set_session_rebuild_callback(move |client| {
            reregister(
                client,
                rebuild_path.clone(),
                rebuild_addrs.clone(),
                rebuild_lock.clone(),
            )
        });

        let (tx, rx) = mpsc::channel(1);
        let worker = tokio::spawn(serve_requests(
            client.clone(),
            path.clone(),
            addrs.clone(),
            create_lock,
            rx,
        ));

        Ok(Self {
            client,
            path,
            addrs,
            requests: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn from_config(client: CoordinationClient, config: &RegistrarConfig) -> Result<Self> {
        Self::new(client, &config.path)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Create the ephemeral node for `addr` and track it for rebuilds.
    pub async fn register(&self, addr: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("registrar".into()));
        }
        let sender = self
            .requests
            .lock()
            .clone()
            .ok_or_else(|| Error::Closed("registrar".into()))?;

        let (reply, result) = oneshot::channel();
        sender
            .send(RegisterRequest {
                addr: addr.to_string(),
                reply,
            })
            .await
            .map_err(|_| Error::Closed("registrar".into()))?;
        result
            .await
            .map_err(|_| Error::Closed("registrar".into()))?
    }

    /// Addresses registered so far, in registration order
    pub fn registered(&self) -> Vec<String> {
        self.addrs.lock().clone()
    }

    /// Stop accepting registrations and release the session, which removes
    /// the ephemeral nodes. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.requests.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(path = %self.path, error = %e, "Registrar worker ended abnormally");
            }
        }
        self.client.close().await;
        info!(path = %self.path, "Registrar closed");
    }
}

async fn serve_requests(
    client: CoordinationClient,
    path: String,
    addrs: Arc<Mutex<Vec<String>>>,
    create_lock: CreateLock,
    mut requests: mpsc::Receiver<RegisterRequest>,
) {
    while let Some(RegisterRequest { addr, reply }) = requests.recv().await {
        let node = child_path(&path, &addr);
        // A rebuild triggered while the create is in flight waits for the
        // push, so it re-creates this node on the new session.
        let guard = create_lock.lock().await;
        let result = match client.create_ephemeral_node(&node).await {
            Ok(()) => {
                addrs.lock().push(addr.clone());
                info!(node = %node, "Registered");
                Ok(())
            }
            Err(e) => {
                warn!(node = %node, error = %e, "Register failed");
                Err(Error::registration(addr, e))
            }
        };
        drop(guard);
        if reply.send(result).is_err() {
            debug!(node = %node, "Register caller went away");
        }
    }
}

async fn reregister(
    client: CoordinationClient,
    path: String,
    addrs: Arc<Mutex<Vec<String>>>,
    create_lock: CreateLock,
) {
    let _guard = create_lock.lock().await;
    let tracked = addrs.lock().clone();
    for addr in tracked {
        let node = child_path(&path, &addr);
        match client.node_exists(&node).await {
            Ok(true) => {
                debug!(node = %node, "Node still present after session build");
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                error!(node = %node, error = %e, "Check node failed on session build");
                continue;
            }
        }
        match client.create_ephemeral_node(&node).await {
            Ok(()) => info!(node = %node, "Re-registered on session build"),
            Err(e) => error!(node = %node, error = %e, "Create node failed on session build"),
        }
    }
}

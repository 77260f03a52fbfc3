//! Membership monitor
//!
//! Watches a directory whose children are backend addresses (for example
//! `/redis/10.0.0.1:6379`, `/redis/10.0.0.2:6379`) and keeps one backend
//! handle per address ever seen:
//!
//! - a new address gets a client from the factory and starts valid
//! - an address that disappears is disabled (`on_disable`) but kept
//! - an address that comes back is re-enabled (`on_enable`)
//!
//! After every diff the valid handles are published as an immutable
//! [`RoutingSnapshot`]; routers read it without taking any lock.

use crate::common::utils::timestamp_now_millis;
use crate::common::{decode_node_name, normalize_path, Error, HashFn, MonitorConfig, Result};
use crate::coordination::{CoordinationClient, DirectoryWatcher, WATCH_RETRY_BACKOFF};
use crate::discovery::backend::{BackendClient, BackendFactory};
use crate::discovery::handle::{BackendHandle, HandleStatus};
use crate::discovery::router::{HashRouter, RoundRobinRouter};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Immutable set of handles that were valid when it was published
pub struct RoutingSnapshot<C> {
    version: u64,
    handles: Vec<Arc<BackendHandle<C>>>,
}

impl<C: BackendClient> RoutingSnapshot<C> {
    pub fn new(version: u64, handles: Vec<Arc<BackendHandle<C>>>) -> Self {
        Self { version, handles }
    }

    pub fn empty() -> Self {
        Self::new(0, Vec::new())
    }

    /// Number of diffs applied before this snapshot was published
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn handles(&self) -> &[Arc<BackendHandle<C>>] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn addrs(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.addr().to_string()).collect()
    }
}

/// Single-writer cell holding the current routing snapshot
pub struct SnapshotCell<C> {
    current: ArcSwap<RoutingSnapshot<C>>,
}

impl<C: BackendClient> SnapshotCell<C> {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RoutingSnapshot::empty()),
        }
    }

    pub fn load(&self) -> Arc<RoutingSnapshot<C>> {
        self.current.load_full()
    }

    pub(crate) fn publish(&self, snapshot: RoutingSnapshot<C>) {
        self.current.store(Arc::new(snapshot));
    }
}

impl<C: BackendClient> Default for SnapshotCell<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Address transitions produced by one diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    pub added: Vec<String>,
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
    /// Addresses the factory could not create a client for; retried next diff
    pub failed: Vec<String>,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.enabled.is_empty()
            && self.disabled.is_empty()
            && self.failed.is_empty()
    }
}

/// Handle arena: positions are never reused and handles never removed.
struct Membership<C> {
    index: HashMap<String, usize>,
    handles: Vec<Arc<BackendHandle<C>>>,
}

impl<C: BackendClient> Membership<C> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            handles: Vec::new(),
        }
    }

    fn apply<F>(&mut self, addrs: &[String], factory: &F, arg: &F::Arg) -> DiffReport
    where
        F: BackendFactory<Client = C>,
    {
        let mut report = DiffReport::default();
        let mut present: HashSet<&str> = HashSet::with_capacity(addrs.len());

        for addr in addrs {
            if !present.insert(addr.as_str()) {
                continue;
            }
            if let Some(&idx) = self.index.get(addr) {
                if self.handles[idx].enable() {
                    report.enabled.push(addr.clone());
                }
                continue;
            }
            match factory.create(addr, arg) {
                Ok(client) => {
                    self.index.insert(addr.clone(), self.handles.len());
                    self.handles
                        .push(Arc::new(BackendHandle::new(addr.clone(), client)));
                    report.added.push(addr.clone());
                }
                Err(e) => {
                    warn!(addr = %addr, error = %e, "Backend client creation failed");
                    report.failed.push(addr.clone());
                }
            }
        }

        for handle in &self.handles {
            if !present.contains(handle.addr()) && handle.disable() {
                report.disabled.push(handle.addr().to_string());
            }
        }
        report
    }

    fn valid_handles(&self) -> Vec<Arc<BackendHandle<C>>> {
        self.handles
            .iter()
            .filter(|h| h.is_valid())
            .cloned()
            .collect()
    }
}

/// Monitor state as exposed on the admin endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub path: String,
    /// Handles in the current routing snapshot
    pub avail_addrs: usize,
    /// Snapshots applied so far
    pub addr_changes: u64,
    pub last_change_ms: Option<i64>,
    pub handles: Vec<HandleStatus>,
}

struct MonitorShared<F: BackendFactory> {
    path: String,
    factory: F,
    arg: F::Arg,
    members: Mutex<Membership<F::Client>>,
    cell: Arc<SnapshotCell<F::Client>>,
    addr_changes: AtomicU64,
    last_change_ms: AtomicI64,
    closed: AtomicBool,
}

impl<F: BackendFactory> MonitorShared<F> {
    fn apply(&self, addrs: &[String]) -> Result<DiffReport> {
        let mut members = self.members.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("membership monitor".into()));
        }

        let report = members.apply(addrs, &self.factory, &self.arg);
        let version = self.addr_changes.fetch_add(1, Ordering::AcqRel) + 1;
        self.cell
            .publish(RoutingSnapshot::new(version, members.valid_handles()));
        self.last_change_ms
            .store(timestamp_now_millis(), Ordering::Release);
        drop(members);

        if !report.is_empty() {
            info!(
                path = %self.path,
                added = ?report.added,
                enabled = ?report.enabled,
                disabled = ?report.disabled,
                failed = ?report.failed,
                "Membership changed"
            );
        }
        Ok(report)
    }

    async fn consume(&self, mut children: mpsc::Receiver<Vec<String>>) {
        while let Some(names) = children.recv().await {
            let addrs: Vec<String> = names
                .iter()
                .filter_map(|name| match decode_node_name(name) {
                    Ok(addr) => Some(addr),
                    Err(e) => {
                        warn!(path = %self.path, error = %e, "Skipping undecodable node");
                        None
                    }
                })
                .collect();
            if let Err(e) = self.apply(&addrs) {
                debug!(path = %self.path, error = %e, "Snapshot not applied");
            }
        }
        debug!(path = %self.path, "Membership monitor stopped");
    }
}

async fn log_watch_errors(path: String, mut errors: mpsc::Receiver<Error>) {
    while let Some(e) = errors.recv().await {
        error!(path = %path, error = %e, "Membership watch error");
    }
}

pub struct MembershipMonitor<F: BackendFactory> {
    client: CoordinationClient,
    watch_retry: Duration,
    shared: Arc<MonitorShared<F>>,
    watcher: tokio::sync::Mutex<Option<DirectoryWatcher>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl<F: BackendFactory> MembershipMonitor<F> {
    pub fn new(client: CoordinationClient, path: &str, factory: F, arg: F::Arg) -> Result<Self> {
        let path = normalize_path(path)?;
        Ok(Self {
            client,
            watch_retry: WATCH_RETRY_BACKOFF,
            shared: Arc::new(MonitorShared {
                path,
                factory,
                arg,
                members: Mutex::new(Membership::new()),
                cell: Arc::new(SnapshotCell::new()),
                addr_changes: AtomicU64::new(0),
                last_change_ms: AtomicI64::new(0),
                closed: AtomicBool::new(false),
            }),
            watcher: tokio::sync::Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    pub fn with_watch_retry(mut self, retry: Duration) -> Self {
        self.watch_retry = retry;
        self
    }

    pub fn path(&self) -> &str {
        &self.shared.path
    }

    /// Start watching. Snapshots are applied on a background task until
    /// [`close`](Self::close).
    pub async fn run(&self) -> Result<()> {
        let mut slot = self.watcher.lock().await;
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("membership monitor".into()));
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::Internal("membership monitor already running".into()));
        }

        let mut watcher = match self
            .client
            .watch_dir(&self.shared.path, self.watch_retry)
            .await
        {
            Ok(watcher) => watcher,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                error!(path = %self.shared.path, error = %e, "Run membership monitor failed");
                return Err(e);
            }
        };
        let (children, errors) = match (watcher.take_children(), watcher.take_errors()) {
            (Some(children), Some(errors)) => (children, errors),
            _ => return Err(Error::Internal("watcher sequences already taken".into())),
        };
        *slot = Some(watcher);

        let shared = self.shared.clone();
        let diff = tokio::spawn(async move { shared.consume(children).await });
        let drain = tokio::spawn(log_watch_errors(self.shared.path.clone(), errors));
        self.tasks.lock().extend([diff, drain]);

        debug!(path = %self.shared.path, "Membership monitor started");
        Ok(())
    }

    /// Apply a set of present addresses directly, as the watch loop does.
    pub fn apply(&self, addrs: &[String]) -> Result<DiffReport> {
        self.shared.apply(addrs)
    }

    /// The snapshot routers currently see
    pub fn snapshot(&self) -> Arc<RoutingSnapshot<F::Client>> {
        self.shared.cell.load()
    }

    pub fn round_robin(&self) -> RoundRobinRouter<F::Client> {
        RoundRobinRouter::new(self.shared.cell.clone())
    }

    /// Hash router; FNV-1a when `hash` is `None`.
    pub fn hash_router(&self, hash: Option<HashFn>) -> HashRouter<F::Client> {
        HashRouter::new(self.shared.cell.clone(), hash)
    }

    pub fn status(&self) -> MonitorStatus {
        let handles = {
            let members = self.shared.members.lock();
            members.handles.iter().map(|h| h.status()).collect()
        };
        let last_change = self.shared.last_change_ms.load(Ordering::Acquire);
        MonitorStatus {
            path: self.shared.path.clone(),
            avail_addrs: self.shared.cell.load().len(),
            addr_changes: self.shared.addr_changes.load(Ordering::Acquire),
            last_change_ms: (last_change > 0).then_some(last_change),
            handles,
        }
    }

    /// Stop watching, close every handle ever created and release the
    /// coordination session. Idempotent.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let watcher = self.watcher.lock().await.take();
        if let Some(mut watcher) = watcher {
            watcher.close().await;
        }
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(path = %self.shared.path, error = %e, "Monitor task ended abnormally");
            }
        }

        {
            let members = self.shared.members.lock();
            for handle in &members.handles {
                handle.close();
            }
            let version = self.shared.addr_changes.load(Ordering::Acquire);
            self.shared
                .cell
                .publish(RoutingSnapshot::new(version, Vec::new()));
        }

        self.client.close().await;
        info!(path = %self.shared.path, "Membership monitor closed");
    }
}

impl<F> MembershipMonitor<F>
where
    F: BackendFactory<Arg = serde_json::Value>,
{
    pub fn from_config(client: CoordinationClient, config: &MonitorConfig, factory: F) -> Result<Self> {
        Ok(Self::new(client, &config.path, factory, config.backend_arg.clone())?
            .with_watch_retry(config.watch_retry()))
    }
}

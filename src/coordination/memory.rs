//! In-process coordination store
//!
//! `MemoryStore` follows ZooKeeper's node semantics closely enough to run a
//! discovery node standalone and to drive failure scenarios in tests:
//! sessions own ephemeral nodes, children watches are one-shot, and the
//! operational controls (`set_available`, `expire_sessions`,
//! `fail_next_create`) reproduce outages, session rebuilds and write failures.

use crate::common::utils::parent_path;
use crate::common::{Error, Result};
use crate::coordination::store::{
    Connector, CreateMode, SessionEvent, SessionEvents, StoreConn, WatchEvent, WatchTrigger,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// A create call as seen by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRecord {
    pub path: String,
    pub mode: CreateMode,
    pub ok: bool,
}

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    owner: Option<u64>,
}

struct ConnEntry {
    session: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

#[derive(Default)]
struct StoreState {
    nodes: BTreeMap<String, Node>,
    conns: HashMap<u64, ConnEntry>,
    next_conn: u64,
    next_session: u64,
    watches: HashMap<String, Vec<oneshot::Sender<WatchEvent>>>,
    unavailable: bool,
    create_faults: HashMap<String, usize>,
    create_log: Vec<CreateRecord>,
}

impl StoreState {
    fn new_session(&mut self) -> u64 {
        self.next_session += 1;
        self.next_session
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(Error::ConnectionFailed("store unavailable".into()));
        }
        Ok(())
    }

    fn session_of(&self, conn: u64) -> Result<u64> {
        self.conns
            .get(&conn)
            .map(|c| c.session)
            .ok_or(Error::NoConnection)
    }

    fn exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| &key[prefix.len()..])
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    fn fire(&mut self, path: &str, event: WatchEvent) {
        if let Some(watchers) = self.watches.remove(path) {
            for tx in watchers {
                let _ = tx.send(event.clone());
            }
        }
    }

    fn fire_all(&mut self, event: WatchEvent) {
        for (_, watchers) in self.watches.drain() {
            for tx in watchers {
                let _ = tx.send(event.clone());
            }
        }
    }

    fn create(&mut self, path: &str, data: &[u8], mode: CreateMode, session: u64) -> Result<()> {
        if let Some(remaining) = self.create_faults.get_mut(path) {
            *remaining -= 1;
            if *remaining == 0 {
                self.create_faults.remove(path);
            }
            self.create_log.push(CreateRecord {
                path: path.to_string(),
                mode,
                ok: false,
            });
            return Err(Error::Store(format!("injected create failure on {}", path)));
        }

        let result = self.insert(path, data, mode, session);
        self.create_log.push(CreateRecord {
            path: path.to_string(),
            mode,
            ok: result.is_ok(),
        });
        result
    }

    fn insert(&mut self, path: &str, data: &[u8], mode: CreateMode, session: u64) -> Result<()> {
        if self.exists(path) {
            return Err(Error::NodeExists(path.to_string()));
        }
        let parent = parent_path(path).ok_or_else(|| Error::InvalidPath(path.to_string()))?;
        if parent != "/" {
            match self.nodes.get(parent) {
                None => return Err(Error::NoNode(parent.to_string())),
                Some(node) if node.owner.is_some() => {
                    return Err(Error::Store(format!(
                        "ephemeral node {} cannot have children",
                        parent
                    )))
                }
                Some(_) => {}
            }
        }

        let owner = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(session),
        };
        self.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                owner,
            },
        );
        let parent = parent.to_string();
        self.fire(&parent, WatchEvent::ChildrenChanged);
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        if !self.nodes.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        if !self.children(path).is_empty() {
            return Err(Error::NotEmpty(path.to_string()));
        }
        self.nodes.remove(path);
        self.fire(path, WatchEvent::Deleted);
        if let Some(parent) = parent_path(path) {
            let parent = parent.to_string();
            self.fire(&parent, WatchEvent::ChildrenChanged);
        }
        Ok(())
    }

    fn drop_ephemerals(&mut self, session: u64) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            if let Err(e) = self.delete(&path) {
                tracing::warn!(path = %path, error = %e, "Failed to drop ephemeral node");
            }
        }
    }

    fn notify(&self, conn: u64, events: &[SessionEvent]) {
        if let Some(entry) = self.conns.get(&conn) {
            for event in events {
                let _ = entry.events.send(*event);
            }
        }
    }
}

/// In-process coordination store. Cloning shares the same namespace.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    ///
    /// Going down fails every outstanding watch and reports `Disconnected`;
    /// coming back reports `Connected` and `HasSession` with sessions intact.
    pub fn set_available(&self, available: bool) {
        let mut state = self.state.lock();
        if state.unavailable != available {
            return;
        }
        state.unavailable = !available;
        let conns: Vec<u64> = state.conns.keys().copied().collect();
        if available {
            for conn in conns {
                state.notify(conn, &[SessionEvent::Connected, SessionEvent::HasSession]);
            }
        } else {
            state.fire_all(WatchEvent::Failed("store unavailable".into()));
            for conn in conns {
                state.notify(conn, &[SessionEvent::Disconnected]);
            }
        }
    }

    /// Expire every live session and rebuild each connection on a new one.
    /// Ephemeral nodes of the old sessions are removed.
    pub fn expire_sessions(&self) {
        let mut state = self.state.lock();
        let conns: Vec<(u64, u64)> = state.conns.iter().map(|(id, c)| (*id, c.session)).collect();
        for (conn, old_session) in conns {
            state.drop_ephemerals(old_session);
            let session = state.new_session();
            if let Some(entry) = state.conns.get_mut(&conn) {
                entry.session = session;
            }
            state.notify(
                conn,
                &[
                    SessionEvent::Disconnected,
                    SessionEvent::Expired,
                    SessionEvent::Connected,
                    SessionEvent::HasSession,
                ],
            );
            tracing::debug!(conn, old_session, session, "Session rebuilt");
        }
    }

    /// Fail the next create on exactly `path`.
    pub fn fail_next_create(&self, path: &str) {
        *self
            .state
            .lock()
            .create_faults
            .entry(path.to_string())
            .or_insert(0) += 1;
    }

    pub fn create_log(&self) -> Vec<CreateRecord> {
        self.state.lock().create_log.clone()
    }

    pub fn clear_create_log(&self) {
        self.state.lock().create_log.clear();
    }

    /// Sorted child names of `path` (empty when it does not exist)
    pub fn children_of(&self, path: &str) -> Vec<String> {
        self.state.lock().children(path)
    }

    pub fn node_data(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().nodes.get(path).map(|n| n.data.clone())
    }

    pub fn is_ephemeral(&self, path: &str) -> bool {
        self.state
            .lock()
            .nodes
            .get(path)
            .is_some_and(|n| n.owner.is_some())
    }

    pub fn live_sessions(&self) -> usize {
        self.state.lock().conns.len()
    }
}

#[async_trait]
impl Connector for MemoryStore {
    async fn connect(
        &self,
        endpoints: &[String],
        _session_timeout: Duration,
    ) -> Result<(Arc<dyn StoreConn>, SessionEvents)> {
        let mut state = self.state.lock();
        if endpoints.is_empty() || state.unavailable {
            return Err(Error::ConnectionFailed(format!(
                "no store endpoint reachable: {:?}",
                endpoints
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.next_conn += 1;
        let conn = state.next_conn;
        let session = state.new_session();
        state.conns.insert(conn, ConnEntry { session, events: tx });
        state.notify(conn, &[SessionEvent::Connected, SessionEvent::HasSession]);
        tracing::debug!(conn, session, "Session opened");

        let handle: Arc<dyn StoreConn> = Arc::new(MemoryConn {
            state: self.state.clone(),
            conn,
        });
        Ok((handle, rx))
    }
}

/// One connection (and its current session) to a [`MemoryStore`]
pub struct MemoryConn {
    state: Arc<Mutex<StoreState>>,
    conn: u64,
}

#[async_trait]
impl StoreConn for MemoryConn {
    async fn exists(&self, path: &str) -> Result<bool> {
        let state = self.state.lock();
        state.session_of(self.conn)?;
        state.ensure_available()?;
        Ok(state.exists(path))
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<()> {
        let mut state = self.state.lock();
        let session = state.session_of(self.conn)?;
        state.ensure_available()?;
        state.create(path, data, mode, session)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.session_of(self.conn)?;
        state.ensure_available()?;
        state.delete(path)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        state.session_of(self.conn)?;
        state.ensure_available()?;
        if !state.exists(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        Ok(state.children(path))
    }

    async fn children_watch(&self, path: &str) -> Result<(Vec<String>, WatchTrigger)> {
        let mut state = self.state.lock();
        state.session_of(self.conn)?;
        state.ensure_available()?;
        if !state.exists(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        state.watches.entry(path.to_string()).or_default().push(tx);
        Ok((state.children(path), rx))
    }

    async fn close(&self) {
        self.release();
    }
}

impl MemoryConn {
    fn release(&self) {
        let mut state = self.state.lock();
        if let Some(entry) = state.conns.remove(&self.conn) {
            state.drop_ephemerals(entry.session);
            tracing::debug!(conn = self.conn, session = entry.session, "Session closed");
        }
    }
}

impl Drop for MemoryConn {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(store: &MemoryStore) -> (Arc<dyn StoreConn>, SessionEvents) {
        store
            .connect(&["memory".to_string()], Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_reports_session() {
        let store = MemoryStore::new();
        let (_conn, mut events) = open(&store).await;
        assert_eq!(events.recv().await, Some(SessionEvent::Connected));
        assert_eq!(events.recv().await, Some(SessionEvent::HasSession));
        assert_eq!(store.live_sessions(), 1);
    }

    #[tokio::test]
    async fn test_connect_unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);
        let result = store.connect(&["memory".to_string()], Duration::from_secs(5)).await;
        assert!(matches!(result, Err(Error::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let store = MemoryStore::new();
        let (conn, _events) = open(&store).await;
        let err = conn.create("/a/b", b"", CreateMode::Persistent).await.unwrap_err();
        assert!(matches!(err, Error::NoNode(p) if p == "/a"));

        conn.create("/a", b"a", CreateMode::Persistent).await.unwrap();
        conn.create("/a/b", b"", CreateMode::Persistent).await.unwrap();
        assert!(matches!(
            conn.create("/a", b"a", CreateMode::Persistent).await,
            Err(Error::NodeExists(_))
        ));
        assert_eq!(conn.children("/a").await.unwrap(), vec!["b"]);
        assert_eq!(conn.children("/").await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_delete_not_empty() {
        let store = MemoryStore::new();
        let (conn, _events) = open(&store).await;
        conn.create("/a", b"", CreateMode::Persistent).await.unwrap();
        conn.create("/a/b", b"", CreateMode::Persistent).await.unwrap();
        assert!(matches!(conn.delete("/a").await, Err(Error::NotEmpty(_))));
        conn.delete("/a/b").await.unwrap();
        conn.delete("/a").await.unwrap();
        assert!(!conn.exists("/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_children_watch_fires_once() {
        let store = MemoryStore::new();
        let (conn, _events) = open(&store).await;
        conn.create("/svc", b"", CreateMode::Persistent).await.unwrap();

        let (children, trigger) = conn.children_watch("/svc").await.unwrap();
        assert!(children.is_empty());
        conn.create("/svc/x:1", b"", CreateMode::Ephemeral).await.unwrap();
        assert_eq!(trigger.await.unwrap(), WatchEvent::ChildrenChanged);

        // Second change without re-arming is not observed
        let (children, trigger) = conn.children_watch("/svc").await.unwrap();
        assert_eq!(children, vec!["x:1"]);
        conn.delete("/svc/x:1").await.unwrap();
        assert_eq!(trigger.await.unwrap(), WatchEvent::ChildrenChanged);
    }

    #[tokio::test]
    async fn test_ephemerals_follow_session() {
        let store = MemoryStore::new();
        let (owner, _events) = open(&store).await;
        let (observer, _observer_events) = open(&store).await;
        owner.create("/svc", b"", CreateMode::Persistent).await.unwrap();
        owner.create("/svc/a:1", b"", CreateMode::Ephemeral).await.unwrap();
        assert!(store.is_ephemeral("/svc/a:1"));

        store.expire_sessions();
        assert!(store.children_of("/svc").is_empty());

        owner.create("/svc/a:1", b"", CreateMode::Ephemeral).await.unwrap();
        owner.close().await;
        assert!(store.children_of("/svc").is_empty());
        assert!(observer.exists("/svc").await.unwrap());
        assert!(matches!(owner.exists("/svc").await, Err(Error::NoConnection)));
    }

    #[tokio::test]
    async fn test_dropped_conn_releases_session() {
        let store = MemoryStore::new();
        let (owner, _events) = open(&store).await;
        let (observer, _observer_events) = open(&store).await;
        owner.create("/svc", b"", CreateMode::Persistent).await.unwrap();
        owner.create("/svc/a:1", b"", CreateMode::Ephemeral).await.unwrap();
        assert_eq!(store.live_sessions(), 2);

        drop(owner);
        assert_eq!(store.live_sessions(), 1);
        assert!(!observer.exists("/svc/a:1").await.unwrap());
        assert!(observer.exists("/svc").await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_emits_rebuild_sequence() {
        let store = MemoryStore::new();
        let (_conn, mut events) = open(&store).await;
        events.recv().await;
        events.recv().await;

        store.expire_sessions();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(events.recv().await.unwrap());
        }
        assert_eq!(
            seen,
            vec![
                SessionEvent::Disconnected,
                SessionEvent::Expired,
                SessionEvent::Connected,
                SessionEvent::HasSession
            ]
        );
    }

    #[tokio::test]
    async fn test_outage_fails_watches() {
        let store = MemoryStore::new();
        let (conn, _events) = open(&store).await;
        conn.create("/svc", b"", CreateMode::Persistent).await.unwrap();
        let (_, trigger) = conn.children_watch("/svc").await.unwrap();

        store.set_available(false);
        assert!(matches!(trigger.await.unwrap(), WatchEvent::Failed(_)));
        assert!(matches!(
            conn.children_watch("/svc").await,
            Err(Error::ConnectionFailed(_))
        ));

        store.set_available(true);
        assert!(conn.children_watch("/svc").await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_create_failure() {
        let store = MemoryStore::new();
        let (conn, _events) = open(&store).await;
        store.fail_next_create("/a");
        assert!(conn.create("/a", b"", CreateMode::Persistent).await.is_err());
        conn.create("/a", b"", CreateMode::Persistent).await.unwrap();

        let log = store.create_log();
        assert_eq!(log.len(), 2);
        assert!(!log[0].ok);
        assert!(log[1].ok);
    }
}

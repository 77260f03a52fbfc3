//! Connection routers over the monitor's routing snapshot
//!
//! Both routers are cheap to create and may be shared across tasks. Neither
//! takes a lock: each pick loads the current snapshot once and works on it.

use crate::common::{default_hash_fn, Error, HashFn, Result};
use crate::discovery::backend::BackendClient;
use crate::discovery::handle::BackendHandle;
use crate::discovery::monitor::SnapshotCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// First valid handle scanning forward from `start`, wrapping once.
fn first_valid<C: BackendClient>(
    handles: &[Arc<BackendHandle<C>>],
    start: usize,
) -> Option<Arc<BackendHandle<C>>> {
    let n = handles.len();
    (0..n)
        .map(|offset| &handles[(start + offset) % n])
        .find(|h| h.is_valid())
        .cloned()
}

/// Spreads picks evenly over the snapshot.
pub struct RoundRobinRouter<C> {
    cell: Arc<SnapshotCell<C>>,
    cursor: AtomicU64,
}

impl<C: BackendClient> RoundRobinRouter<C> {
    pub fn new(cell: Arc<SnapshotCell<C>>) -> Self {
        Self {
            cell,
            cursor: AtomicU64::new(0),
        }
    }

    /// Advance the cursor and return the chosen handle without
    /// dispensing a connection.
    pub fn next_handle(&self) -> Result<Arc<BackendHandle<C>>> {
        let snapshot = self.cell.load();
        if snapshot.is_empty() {
            return Err(Error::NoAddressAvailable);
        }
        let cursor = self.cursor.fetch_add(1, Ordering::Relaxed);
        let start = (cursor % snapshot.len() as u64) as usize;
        first_valid(snapshot.handles(), start).ok_or(Error::NoAddressAvailable)
    }

    pub fn get_connection(&self) -> Result<C::Conn> {
        Ok(self.next_handle()?.allocate())
    }
}

/// Maps a key to a fixed position in the snapshot. The mapping moves when
/// the membership changes.
pub struct HashRouter<C> {
    cell: Arc<SnapshotCell<C>>,
    hash: HashFn,
}

impl<C: BackendClient> HashRouter<C> {
    /// Uses FNV-1a (32 bit) when `hash` is `None`.
    pub fn new(cell: Arc<SnapshotCell<C>>, hash: Option<HashFn>) -> Self {
        Self {
            cell,
            hash: hash.unwrap_or_else(default_hash_fn),
        }
    }

    pub fn next_handle(&self, key: &[u8]) -> Result<Arc<BackendHandle<C>>> {
        let snapshot = self.cell.load();
        if snapshot.is_empty() {
            return Err(Error::NoAddressAvailable);
        }
        let start = (self.hash)(key) as usize % snapshot.len();
        first_valid(snapshot.handles(), start).ok_or(Error::NoAddressAvailable)
    }

    pub fn get_connection(&self, key: &[u8]) -> Result<C::Conn> {
        Ok(self.next_handle(key)?.allocate())
    }
}

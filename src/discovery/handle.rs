//! Per-address backend handle

use crate::discovery::backend::BackendClient;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Wraps the client of one address together with its routing state.
///
/// `valid` and the transition counters are written only by the monitor's
/// diff loop; routers and status readers only load them.
pub struct BackendHandle<C> {
    addr: String,
    client: C,
    valid: AtomicBool,
    enable_count: AtomicU64,
    disable_count: AtomicU64,
    alloc_count: AtomicU64,
}

impl<C: BackendClient> BackendHandle<C> {
    /// A new handle starts out valid.
    pub fn new(addr: impl Into<String>, client: C) -> Self {
        Self {
            addr: addr.into(),
            client,
            valid: AtomicBool::new(true),
            enable_count: AtomicU64::new(0),
            disable_count: AtomicU64::new(0),
            alloc_count: AtomicU64::new(0),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn enable_count(&self) -> u64 {
        self.enable_count.load(Ordering::Relaxed)
    }

    pub fn disable_count(&self) -> u64 {
        self.disable_count.load(Ordering::Relaxed)
    }

    pub fn alloc_count(&self) -> u64 {
        self.alloc_count.load(Ordering::Relaxed)
    }

    /// Mark valid and notify the client. Returns false if already valid.
    pub(crate) fn enable(&self) -> bool {
        if self.valid.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.client.on_enable();
        self.enable_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Mark invalid and notify the client. Returns false if already invalid.
    pub(crate) fn disable(&self) -> bool {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.client.on_disable();
        self.disable_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub(crate) fn close(&self) {
        self.valid.store(false, Ordering::Release);
        self.client.close();
    }

    /// Dispense a connection, counting the allocation.
    pub(crate) fn allocate(&self) -> C::Conn {
        self.alloc_count.fetch_add(1, Ordering::Relaxed);
        self.client.connection()
    }

    pub fn status(&self) -> HandleStatus {
        HandleStatus {
            valid: self.is_valid(),
            addr: self.addr.clone(),
            enable_count: self.enable_count(),
            disable_count: self.disable_count(),
            alloc_count: self.alloc_count(),
            backend_status: self.client.status(),
        }
    }
}

impl<C> std::fmt::Debug for BackendHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("addr", &self.addr)
            .field("valid", &self.valid.load(Ordering::Relaxed))
            .finish()
    }
}

/// Point-in-time view of one handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleStatus {
    pub valid: bool,
    pub addr: String,
    pub enable_count: u64,
    pub disable_count: u64,
    pub alloc_count: u64,
    pub backend_status: String,
}

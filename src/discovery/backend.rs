//! Backend client interface
//!
//! The monitor creates one client per address through a [`BackendFactory`]
//! and keeps it for as long as the monitor lives. Connection pooling and the
//! wire protocol stay inside the client.

use crate::common::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub trait BackendClient: Send + Sync + 'static {
    /// What a router hands out, e.g. a pooled connection or a client handle
    type Conn;

    fn connection(&self) -> Self::Conn;

    /// Human-readable state, surfaced in monitor status
    fn status(&self) -> String;

    /// Called once, when the monitor shuts down
    fn close(&self);

    /// The address left the watched directory
    fn on_disable(&self);

    /// The address came back after being disabled
    fn on_enable(&self);
}

pub trait BackendFactory: Send + Sync + 'static {
    type Client: BackendClient;

    /// Opaque per-deployment argument passed to every `create`
    type Arg: Send + Sync + 'static;

    fn create(&self, addr: &str, arg: &Self::Arg) -> Result<Self::Client>;
}

/// Client whose connection is the address itself; callers dial it.
#[derive(Debug)]
pub struct AddrBackend {
    addr: String,
    enabled: AtomicBool,
    closed: AtomicBool,
    handed_out: AtomicU64,
}

impl AddrBackend {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            handed_out: AtomicU64::new(0),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl BackendClient for AddrBackend {
    type Conn = String;

    fn connection(&self) -> String {
        self.handed_out.fetch_add(1, Ordering::Relaxed);
        self.addr.clone()
    }

    fn status(&self) -> String {
        let state = if self.is_closed() {
            "closed"
        } else if self.enabled.load(Ordering::Acquire) {
            "enabled"
        } else {
            "disabled"
        };
        format!(
            "{} handed_out={}",
            state,
            self.handed_out.load(Ordering::Relaxed)
        )
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn on_disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    fn on_enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AddrBackendFactory;

impl BackendFactory for AddrBackendFactory {
    type Client = AddrBackend;
    type Arg = serde_json::Value;

    fn create(&self, addr: &str, _arg: &serde_json::Value) -> Result<AddrBackend> {
        Ok(AddrBackend::new(addr))
    }
}

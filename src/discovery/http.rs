//! Admin HTTP surface
//!
//! - `GET /health`: liveness
//! - `GET /admin/status`: monitor state and registered addresses

use crate::common::tracing_middleware::request_id_middleware;
use crate::discovery::backend::BackendFactory;
use crate::discovery::monitor::{MembershipMonitor, MonitorStatus};
use crate::discovery::registrar::SelfRegistrar;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::{middleware, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Anything that can report a [`MonitorStatus`]; lets the router stay
/// independent of the backend factory type.
pub trait StatusSource: Send + Sync {
    fn monitor_status(&self) -> MonitorStatus;
}

impl<F: BackendFactory> StatusSource for MembershipMonitor<F> {
    fn monitor_status(&self) -> MonitorStatus {
        self.status()
    }
}

#[derive(Clone, Default)]
pub struct AdminState {
    pub monitor: Option<Arc<dyn StatusSource>>,
    pub registrar: Option<Arc<SelfRegistrar>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrarStatus {
    pub path: String,
    pub registered: Vec<String>,
}

/// Body of `GET /admin/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminStatus {
    pub version: String,
    pub monitor: Option<MonitorStatus>,
    pub registrar: Option<RegistrarStatus>,
}

pub fn create_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/admin/status", axum::routing::get(admin_status))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
    }))
}

async fn admin_status(State(state): State<AdminState>) -> Json<AdminStatus> {
    Json(AdminStatus {
        version: crate::VERSION.to_string(),
        monitor: state.monitor.as_ref().map(|m| m.monitor_status()),
        registrar: state.registrar.as_ref().map(|r| RegistrarStatus {
            path: r.path().to_string(),
            registered: r.registered(),
        }),
    })
}

//! Discovery node: registrar, monitor and admin HTTP wired from config

use crate::common::{Config, Result};
use crate::coordination::{CoordinationClient, Connector};
use crate::discovery::backend::AddrBackendFactory;
use crate::discovery::http::{create_router, AdminState, StatusSource};
use crate::discovery::monitor::MembershipMonitor;
use crate::discovery::registrar::SelfRegistrar;
use std::future::Future;
use std::sync::Arc;

pub struct DiscoveryNode {
    config: Config,
    connector: Arc<dyn Connector>,
}

impl DiscoveryNode {
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    fn client(&self) -> CoordinationClient {
        CoordinationClient::from_config(&self.config.store, self.connector.clone())
    }

    /// Run until ctrl-c.
    pub async fn serve(self) -> Result<()> {
        self.serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
    }

    pub async fn serve_until<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Starting discovery node");
        tracing::info!("  Store endpoints: {:?}", self.config.store.endpoints);
        tracing::info!("  Session timeout: {:?}", self.config.store.session_timeout());

        let registrar = match &self.config.registrar {
            Some(cfg) => {
                tracing::info!("  Registering {:?} under {}", cfg.addrs, cfg.path);
                let registrar = Arc::new(SelfRegistrar::from_config(self.client(), cfg)?);
                for addr in &cfg.addrs {
                    if let Err(e) = registrar.register(addr).await {
                        tracing::error!("Registration of {} failed: {}", addr, e);
                        registrar.close().await;
                        return Err(e);
                    }
                }
                Some(registrar)
            }
            None => None,
        };

        let monitor = match &self.config.monitor {
            Some(cfg) => {
                tracing::info!("  Watching {}", cfg.path);
                let monitor = Arc::new(MembershipMonitor::from_config(
                    self.client(),
                    cfg,
                    AddrBackendFactory,
                )?);
                if let Err(e) = monitor.run().await {
                    if let Some(registrar) = &registrar {
                        registrar.close().await;
                    }
                    return Err(e);
                }
                Some(monitor)
            }
            None => None,
        };

        let result = if self.config.admin.enabled {
            let state = AdminState {
                monitor: monitor.clone().map(|m| m as Arc<dyn StatusSource>),
                registrar: registrar.clone(),
            };
            self.serve_admin(state, shutdown).await
        } else {
            tracing::info!("✓ Discovery node ready (admin HTTP disabled)");
            shutdown.await;
            Ok(())
        };

        tracing::info!("Shutting down discovery node");
        if let Some(monitor) = monitor {
            monitor.close().await;
        }
        if let Some(registrar) = registrar {
            registrar.close().await;
        }
        result
    }

    async fn serve_admin<S>(&self, state: AdminState, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.config.admin.bind_addr).await?;
        tracing::info!("  Admin HTTP: {}", listener.local_addr()?);
        tracing::info!("✓ Discovery node ready");

        axum::serve(listener, create_router(state))
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

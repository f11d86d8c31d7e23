//! Gateway service - wires the store, poller, interceptor, and listeners.
//!
//! Runs three HTTP servers: the proxy clients talk to, the callback listener
//! the upstream posts webhooks to, and a local admin server.

use crate::adapters::HttpStatusLookup;
use crate::callback::callback_router;
use crate::domain::config::GatewayConfig;
use crate::domain::error::GatewayError;
use crate::domain::pending::{cleanup_task, CorrelationStore, InMemoryCorrelationStore};
use crate::middleware::{GatewayMetrics, TracingLayer};
use crate::poller::Poller;
use crate::ports::StatusLookup;
use crate::proxy::{InterceptLayer, Interceptor, UpstreamForwarder};
use axum::{response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::{error, info};

/// Sync gateway service state
pub struct SyncGatewayService {
    config: GatewayConfig,
    store: Arc<dyn CorrelationStore>,
    lookup: Arc<dyn StatusLookup>,
    forwarder: UpstreamForwarder,
    metrics: Arc<GatewayMetrics>,
}

impl SyncGatewayService {
    /// Create a new gateway service
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let lookup = Arc::new(HttpStatusLookup::new(&config.upstream, &config.poll)?);
        let forwarder = UpstreamForwarder::new(&config.upstream, &config.limits)?;

        Ok(Self {
            config,
            store: Arc::new(InMemoryCorrelationStore::new()),
            lookup,
            forwarder,
            metrics: Arc::new(GatewayMetrics::new()),
        })
    }

    /// Bind all listeners and start serving.
    ///
    /// Returns once every socket is bound; the servers keep running until
    /// [`GatewayHandle::shutdown`] is called.
    pub async fn start(self) -> Result<GatewayHandle, GatewayError> {
        info!("Starting sync gateway...");
        let shutdown = CancellationToken::new();

        let proxy_listener = bind(self.config.proxy_addr()).await?;
        let callback_listener = bind(self.config.callback_addr()).await?;
        let admin_listener = if self.config.admin.enabled {
            Some(bind(self.config.admin_addr()).await?)
        } else {
            None
        };

        let proxy_addr = proxy_listener.local_addr()?;
        let callback_addr = callback_listener.local_addr()?;
        let admin_addr = admin_listener
            .as_ref()
            .map(TcpListener::local_addr)
            .transpose()?;

        let mut tasks = Vec::with_capacity(4);

        info!(addr = %proxy_addr, upstream = %self.config.upstream.base(), "Starting proxy server");
        tasks.push(serve(
            "proxy",
            proxy_listener,
            self.build_proxy_router(shutdown.clone()),
            shutdown.clone(),
        ));

        info!(
            addr = %callback_addr,
            base_url = %self.config.callback.base_url,
            "Starting callback server"
        );
        tasks.push(serve(
            "callback",
            callback_listener,
            callback_router(
                Arc::clone(&self.store),
                Arc::clone(&self.metrics),
                self.config.limits.max_callback_size,
            ),
            shutdown.clone(),
        ));

        if let Some(listener) = admin_listener {
            info!(addr = ?admin_addr, "Starting admin server");
            tasks.push(serve(
                "admin",
                listener,
                self.build_admin_router(),
                shutdown.clone(),
            ));
        }

        let store = Arc::clone(&self.store);
        let sweep = self.config.sweep.clone();
        let sweep_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = sweep_shutdown.cancelled() => {}
                _ = cleanup_task(store, sweep.interval, sweep.max_age) => {}
            }
        }));

        info!("Sync gateway started successfully");

        Ok(GatewayHandle {
            proxy_addr,
            callback_addr,
            admin_addr,
            shutdown,
            tasks,
        })
    }

    /// Build the proxy router: tracing, then interception, then forwarding
    fn build_proxy_router(&self, shutdown: CancellationToken) -> Router {
        let poller = Arc::new(Poller::new(
            Arc::clone(&self.lookup),
            &self.config.poll,
            Arc::clone(&self.metrics),
        ));
        let interceptor = Interceptor::new(
            &self.config,
            Arc::clone(&self.store),
            poller,
            Arc::clone(&self.metrics),
        )
        .with_shutdown(shutdown);

        let proxy = ServiceBuilder::new()
            .layer(TracingLayer::new(Arc::clone(&self.metrics)))
            .layer(InterceptLayer::new(interceptor))
            .service(self.forwarder.clone());

        Router::new().fallback_service(proxy)
    }

    /// Build Admin router
    fn build_admin_router(&self) -> Router {
        let metrics = Arc::clone(&self.metrics);
        let store = Arc::clone(&self.store);

        Router::new()
            .route("/health", get(health_check))
            .route(
                "/metrics",
                get(move || {
                    let metrics = Arc::clone(&metrics);
                    async move { Json(metrics.to_json()) }
                }),
            )
            .route(
                "/pending",
                get(move || {
                    let store = Arc::clone(&store);
                    async move {
                        let stats = store.stats();
                        Json(serde_json::json!({
                            "count": store.len(),
                            "stats": {
                                "registered": stats.total_registered.load(Ordering::Relaxed),
                                "deleted": stats.total_deleted.load(Ordering::Relaxed),
                                "evicted": stats.total_evicted.load(Ordering::Relaxed),
                            }
                        }))
                    }
                }),
            )
    }
}

/// Running gateway
pub struct GatewayHandle {
    proxy_addr: SocketAddr,
    callback_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl GatewayHandle {
    pub fn proxy_addr(&self) -> SocketAddr {
        self.proxy_addr
    }

    pub fn callback_addr(&self) -> SocketAddr {
        self.callback_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// Resolves once shutdown has been requested.
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await
    }

    /// Trigger graceful shutdown and wait for the servers to drain
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Gateway task panicked");
            }
        }
        info!("Sync gateway stopped");
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, GatewayError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Bind(format!("{addr}: {e}")))
}

/// Serve `router` until `shutdown` fires. A server error also requests
/// shutdown of the other servers.
fn serve(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let graceful = shutdown.clone();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(server = name, error = %e, "Server error");
            shutdown.cancel();
        }
    })
}

/// Health check handler
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": crate::VERSION,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn local_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.proxy.host = localhost;
        config.proxy.port = 0;
        config.callback.host = localhost;
        config.callback.port = 0;
        config.admin.host = localhost;
        config.admin.port = 0;
        config
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = GatewayConfig::default();
        config.wait.timeout = std::time::Duration::ZERO;

        assert!(matches!(
            SyncGatewayService::new(config),
            Err(GatewayError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_endpoints() {
        let service = SyncGatewayService::new(local_config()).unwrap();
        let handle = service.start().await.unwrap();
        let admin = handle.admin_addr().unwrap();
        let client = reqwest::Client::new();

        let health: serde_json::Value = client
            .get(format!("http://{admin}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "healthy");

        let pending: serde_json::Value = client
            .get(format!("http://{admin}/pending"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(pending["count"], 0);

        let metrics: serde_json::Value = client
            .get(format!("http://{admin}/metrics"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(metrics["sends"]["intercepted"], 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = local_config();
        config.proxy.port = taken.local_addr().unwrap().port();

        let err = SyncGatewayService::new(config)
            .unwrap()
            .start()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::Bind(_)));
    }
}

//! Supervisor: wires components together and manages the lifecycle
//!
//! Startup binds every configured listener before serving, so address
//! conflicts fail the process instead of leaving it half-running. The
//! optional transparent listener is the one exception: it degrades to a
//! warning, mirroring its optional role.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::api;
use crate::config::Config;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::proxy::ProxyServer;
use crate::router::{Mode, Router, TunnelControl, WebhookSink};
use crate::webhook::Webhook;

/// How often the home cap is re-checked
const LIMIT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Graceful deadline for the API server on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The assembled gateway.
pub struct App {
    config: Config,
    router: Arc<Router>,
    metrics: Arc<Metrics>,
    shutdown_tx: broadcast::Sender<()>,
}

impl App {
    pub fn from_config(config: Config) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());

        let webhook: Option<Arc<dyn WebhookSink>> =
            if config.webhooks.enabled && !config.webhooks.url.is_empty() {
                info!("Webhook notifications enabled ({})", config.webhooks.url);
                Some(Arc::new(Webhook::new(
                    config.webhooks.url.as_str(),
                    config.webhooks.secret.as_str(),
                    config.webhooks.source.as_str(),
                )))
            } else {
                None
            };

        let router = Arc::new(Router::from_config(&config, metrics.clone(), webhook)?);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            router,
            metrics,
            shutdown_tx,
        })
    }

    /// Handle for requesting shutdown programmatically.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    /// Run until SIGINT/SIGTERM or a shutdown request, then drain.
    pub async fn run(&self) -> Result<()> {
        let _tunnel_control = if self.router.available_modes().contains(&Mode::Warp) {
            Some(TunnelControl::new().await)
        } else {
            None
        };

        let mut handles = Vec::new();

        let proxy = ProxyServer::bind(&self.config.server.listen, self.router.clone()).await?;
        let shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            if let Err(e) = proxy.serve(shutdown_rx).await {
                error!("SOCKS5 proxy error: {}", e);
            }
        }));

        #[cfg(target_os = "linux")]
        if let Some(addr) = &self.config.server.transparent {
            match crate::proxy::TransparentServer::bind(addr, self.router.clone()).await {
                Ok(server) => {
                    let shutdown_rx = self.shutdown_tx.subscribe();
                    handles.push(tokio::spawn(async move {
                        if let Err(e) = server.serve(shutdown_rx).await {
                            error!("Transparent proxy error: {}", e);
                        }
                    }));
                }
                Err(e) => warn!("Transparent proxy not available: {}", e),
            }
        }

        #[cfg(not(target_os = "linux"))]
        if self.config.server.transparent.is_some() {
            warn!("Transparent proxy is only supported on Linux");
        }

        let api_listener = TcpListener::bind(self.config.server.api.as_str()).await?;
        let api_router = self.router.clone();
        let api_metrics = self.metrics.clone();
        let api_shutdown = self.shutdown_tx.subscribe();
        let api_handle = tokio::spawn(async move {
            if let Err(e) = api::serve(api_listener, api_router, api_metrics, api_shutdown).await {
                error!("API server error: {}", e);
            }
        });

        let ticker_router = self.router.clone();
        let mut ticker_shutdown = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LIMIT_CHECK_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => ticker_router.check_limits(),
                    _ = ticker_shutdown.recv() => return,
                }
            }
        }));

        let mut external_shutdown = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = wait_for_signal() => {
                let _ = self.shutdown_tx.send(());
            }
            _ = external_shutdown.recv() => {}
        }

        info!("Shutting down...");

        for handle in handles {
            let _ = handle.await;
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, api_handle).await.is_err() {
            warn!("API server did not stop within the grace period");
        }

        Ok(())
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let config = Config::from_json(
            r#"{
                "server": {
                    "listen": "127.0.0.1:0",
                    "api": "127.0.0.1:0"
                }
            }"#,
        )
        .unwrap();

        let app = App::from_config(config).unwrap();
        let shutdown = app.shutdown_handle();
        assert_eq!(app.router().available_modes(), vec![Mode::Direct]);

        let run = tokio::spawn(async move { app.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        shutdown.send(()).unwrap();
        run.await.unwrap().unwrap();
    }
}

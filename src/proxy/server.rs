//! SOCKS5 ingress server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::router::Router;

use super::{relay, socks5};

/// Deadline for the SOCKS5 handshake; cleared once bytes flow
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts SOCKS5 clients and relays them through the router.
pub struct ProxyServer {
    listener: TcpListener,
    router: Arc<Router>,
}

impl ProxyServer {
    pub async fn bind(addr: &str, router: Arc<Router>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until shutdown. Transient accept errors are logged and
    /// retried; connection tasks race their work against shutdown so
    /// active relays are force-closed when the server stops.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("SOCKS5 proxy listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!("New connection from {}", peer);
                            let router = self.router.clone();
                            let mut conn_shutdown = shutdown.resubscribe();
                            tokio::spawn(async move {
                                tokio::select! {
                                    _ = handle_connection(stream, router) => {}
                                    _ = conn_shutdown.recv() => {
                                        debug!("Connection from {} closed on shutdown", peer);
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept failed: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("SOCKS5 proxy shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, router: Arc<Router>) {
    let target = match timeout(HANDSHAKE_TIMEOUT, socks5::handshake(&mut stream)).await {
        Ok(Ok(target)) => target,
        Ok(Err(e)) => {
            debug!("SOCKS5 handshake failed: {}", e);
            return;
        }
        Err(_) => {
            debug!("SOCKS5 handshake timed out");
            return;
        }
    };

    let upstream = match router.dial("tcp", &target).await {
        Ok(conn) => conn,
        Err(e) => {
            debug!("Failed to dial {}: {}", target, e);
            socks5::reply(&mut stream, socks5::REP_CONNECTION_REFUSED).await;
            return;
        }
    };

    socks5::reply(&mut stream, socks5::REP_SUCCESS).await;
    relay::run(stream, upstream).await;
    debug!("Relay for {} finished", target);
}

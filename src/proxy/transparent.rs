//! Transparent ingress for iptables REDIRECT (Linux only)
//!
//! Clients arrive here via kernel DNAT; there is no application-level
//! handshake. The pre-NAT destination is recovered from the accepted
//! socket with `SO_ORIGINAL_DST` and dialed through the router.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::fd::AsRawFd;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::router::Router;

use super::relay;

/// getsockopt option recovering the pre-DNAT destination (IPv4 only)
const SO_ORIGINAL_DST: libc::c_int = 80;

/// Accepts DNAT-redirected connections and relays them through the
/// router.
pub struct TransparentServer {
    listener: TcpListener,
    router: Arc<Router>,
}

impl TransparentServer {
    pub async fn bind(addr: &str, router: Arc<Router>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("Transparent proxy listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let router = self.router.clone();
                            let mut conn_shutdown = shutdown.resubscribe();
                            tokio::spawn(async move {
                                tokio::select! {
                                    _ = handle_connection(stream, peer, router) => {}
                                    _ = conn_shutdown.recv() => {
                                        debug!("Connection from {} closed on shutdown", peer);
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!("Transparent accept failed: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Transparent proxy shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, router: Arc<Router>) {
    let target = match original_dst(&stream) {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to get original destination: {}", e);
            return;
        }
    };

    debug!("Transparent proxy: {} -> {}", peer, target);

    let upstream = match router.dial("tcp", &target.to_string()).await {
        Ok(conn) => conn,
        Err(e) => {
            error!("Failed to dial {}: {}", target, e);
            return;
        }
    };

    relay::run(stream, upstream).await;
}

/// Read the original IPv4 destination of a REDIRECTed connection.
fn original_dst(stream: &TcpStream) -> std::io::Result<SocketAddr> {
    let fd = stream.as_raw_fd();

    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_IP,
            SO_ORIGINAL_DST,
            &mut addr as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let port = u16::from_be(addr.sin_port);
    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

//! Dialer capability and the direct/tunnel variants
//!
//! A dialer opens a TCP stream to `host:port` through one upstream path.
//! All variants share the same connect policy: OS resolver, 10 s
//! per-attempt connect timeout, 30 s TCP keepalive, Nagle off.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;

use crate::common::TargetAddr;
use crate::error::{Error, Result};

/// Per-attempt connect timeout
pub(crate) const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP keepalive idle time on dialed sockets
const KEEPALIVE: Duration = Duration::from_secs(30);

/// Capability to open a stream to a target through a particular path.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `address` (`host:port`). `network` must be `"tcp"`.
    async fn dial(&self, network: &str, address: &str) -> Result<TcpStream>;

    fn name(&self) -> &'static str;
}

fn ensure_tcp(network: &str) -> Result<()> {
    if network != "tcp" {
        return Err(Error::Unsupported(format!("network {}", network)));
    }
    Ok(())
}

/// Resolve and connect, trying each candidate address with its own
/// timeout. When `local_ip` is set the socket is bound to it before
/// connecting and candidates of the other address family are skipped.
pub(crate) async fn connect_tcp(
    address: &str,
    local_ip: Option<IpAddr>,
) -> Result<TcpStream> {
    let target = TargetAddr::parse(address)?;
    let addrs = target.resolve().await?;

    let mut last_err = None;
    for addr in addrs {
        if let Some(ip) = local_ip {
            if ip.is_ipv4() != addr.is_ipv4() {
                continue;
            }
        }

        match timeout(DIAL_TIMEOUT, connect_one(addr, local_ip)).await {
            Ok(Ok(stream)) => {
                configure_stream(&stream)?;
                return Ok(stream);
            }
            Ok(Err(e)) => last_err = Some(Error::Io(e)),
            Err(_) => last_err = Some(Error::Timeout),
        }
    }

    Err(last_err.unwrap_or_else(|| Error::DialFailed(format!("no usable addresses for {}", address))))
}

async fn connect_one(addr: SocketAddr, local_ip: Option<IpAddr>) -> std::io::Result<TcpStream> {
    match local_ip {
        Some(ip) => {
            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            socket.bind(SocketAddr::new(ip, 0))?;
            socket.connect(addr).await
        }
        None => TcpStream::connect(addr).await,
    }
}

fn configure_stream(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    let sock = SockRef::from(stream);
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE))?;
    Ok(())
}

/// Check that a network interface exists.
pub(crate) fn interface_exists(name: &str) -> bool {
    #[cfg(unix)]
    {
        let Ok(cname) = std::ffi::CString::new(name) else {
            return false;
        };
        unsafe { libc::if_nametoindex(cname.as_ptr()) != 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = name;
        false
    }
}

/// Check that a network interface exists and carries the up flag.
pub(crate) fn check_interface_up(name: &str) -> Result<()> {
    if !interface_exists(name) {
        return Err(Error::InterfaceDown(format!("{} interface not found", name)));
    }

    #[cfg(target_os = "linux")]
    {
        let path = format!("/sys/class/net/{}/flags", name);
        if let Ok(raw) = std::fs::read_to_string(&path) {
            let raw = raw.trim().trim_start_matches("0x");
            if let Ok(flags) = u64::from_str_radix(raw, 16) {
                if flags & libc::IFF_UP as u64 == 0 {
                    return Err(Error::InterfaceDown(format!("{} interface down", name)));
                }
            }
        }
    }

    Ok(())
}

/// Connects via the OS default route, optionally pinned to a local
/// source IP. The pin is how the gateway reaches the upstream proxy past
/// a policy-routed tunnel without disabling the tunnel globally.
pub struct DirectDialer {
    local_ip: Option<IpAddr>,
}

impl DirectDialer {
    pub fn new(local_ip: Option<IpAddr>) -> Self {
        Self { local_ip }
    }

    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local_ip
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, network: &str, address: &str) -> Result<TcpStream> {
        ensure_tcp(network)?;
        connect_tcp(address, self.local_ip).await
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

/// Connects via the OS default route without binding a local address.
/// The host's policy routing steers the traffic into the tunnel
/// interface; binding the TUN device's IP does not work.
#[derive(Debug)]
pub struct TunnelDialer {
    interface: String,
}

impl TunnelDialer {
    /// Fails when the named interface does not exist (tunnel not
    /// installed), in which case the mode stays unavailable.
    pub fn new(interface: impl Into<String>) -> Result<Self> {
        let interface = interface.into();
        if !interface_exists(&interface) {
            return Err(Error::InterfaceDown(format!(
                "{} interface not found",
                interface
            )));
        }
        Ok(Self { interface })
    }

    pub fn interface_name(&self) -> &str {
        &self.interface
    }
}

#[async_trait]
impl Dialer for TunnelDialer {
    async fn dial(&self, network: &str, address: &str) -> Result<TcpStream> {
        ensure_tcp(network)?;
        connect_tcp(address, None).await
    }

    fn name(&self) -> &'static str {
        "warp"
    }
}

//! Upstream SOCKS5 dialer (the `home` path)

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::common::TargetAddr;
use crate::error::{Error, Result};

use super::dialer::{connect_tcp, Dialer};

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const AUTH_PASSWORD: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;

/// Dials targets through an upstream SOCKS5 proxy (RFC 1928 CONNECT,
/// optional RFC 1929 username/password).
///
/// The TCP leg *to the proxy* may be bound to a local IP so it bypasses
/// the tunnel even when the tunnel is the default route.
pub struct Socks5Dialer {
    proxy_addr: String,
    auth: Option<(String, String)>,
    local_ip: Option<std::net::IpAddr>,
}

impl Socks5Dialer {
    pub fn new(
        host: &str,
        port: u16,
        auth: Option<(String, String)>,
        local_ip: Option<std::net::IpAddr>,
    ) -> Self {
        Self {
            proxy_addr: format!("{}:{}", host, port),
            auth,
            local_ip,
        }
    }

    pub fn proxy_addr(&self) -> &str {
        &self.proxy_addr
    }

    async fn handshake(&self, stream: &mut TcpStream, target: &TargetAddr) -> Result<()> {
        // 1. Greeting with our single supported method
        let method = if self.auth.is_some() {
            AUTH_PASSWORD
        } else {
            AUTH_NONE
        };
        stream.write_all(&[SOCKS5_VERSION, 1, method]).await?;

        let mut response = [0u8; 2];
        stream.read_exact(&mut response).await?;

        if response[0] != SOCKS5_VERSION {
            return Err(Error::Protocol("Invalid SOCKS version from proxy".into()));
        }
        if response[1] == AUTH_NO_ACCEPTABLE {
            return Err(Error::Protocol("Proxy rejected auth methods".into()));
        }

        // 2. Username/password sub-negotiation
        if response[1] == AUTH_PASSWORD {
            let (username, password) = self
                .auth
                .as_ref()
                .map(|(u, p)| (u.as_str(), p.as_str()))
                .unwrap_or(("", ""));

            if username.len() > 255 || password.len() > 255 {
                return Err(Error::Protocol("Credentials too long".into()));
            }

            let mut request = vec![0x01];
            request.push(username.len() as u8);
            request.extend_from_slice(username.as_bytes());
            request.push(password.len() as u8);
            request.extend_from_slice(password.as_bytes());
            stream.write_all(&request).await?;

            let mut auth_response = [0u8; 2];
            stream.read_exact(&mut auth_response).await?;
            if auth_response[1] != 0x00 {
                return Err(Error::Protocol("Proxy authentication failed".into()));
            }
        }

        // 3. CONNECT request carrying the target
        let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
        match target {
            TargetAddr::Ip(addr) => match addr {
                std::net::SocketAddr::V4(v4) => {
                    request.push(ATYP_IPV4);
                    request.extend_from_slice(&v4.ip().octets());
                    request.extend_from_slice(&v4.port().to_be_bytes());
                }
                std::net::SocketAddr::V6(v6) => {
                    request.push(ATYP_IPV6);
                    request.extend_from_slice(&v6.ip().octets());
                    request.extend_from_slice(&v6.port().to_be_bytes());
                }
            },
            TargetAddr::Domain(domain, port) => {
                if domain.len() > 255 {
                    return Err(Error::Protocol("Domain name too long".into()));
                }
                request.push(ATYP_DOMAIN);
                request.push(domain.len() as u8);
                request.extend_from_slice(domain.as_bytes());
                request.extend_from_slice(&port.to_be_bytes());
            }
        }
        stream.write_all(&request).await?;

        // 4. Reply
        let mut response = [0u8; 4];
        stream.read_exact(&mut response).await?;

        if response[0] != SOCKS5_VERSION {
            return Err(Error::Protocol("Invalid SOCKS version in reply".into()));
        }
        if response[1] != REP_SUCCESS {
            let reason = match response[1] {
                0x01 => "general failure",
                0x02 => "connection not allowed",
                0x03 => "network unreachable",
                0x04 => "host unreachable",
                0x05 => "connection refused",
                0x06 => "TTL expired",
                0x07 => "command not supported",
                0x08 => "address type not supported",
                _ => "unknown error",
            };
            return Err(Error::Protocol(format!("SOCKS5 proxy: {}", reason)));
        }

        // Skip the bound address
        match response[3] {
            ATYP_IPV4 => {
                let mut skip = [0u8; 6];
                stream.read_exact(&mut skip).await?;
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                let mut skip = vec![0u8; len[0] as usize + 2];
                stream.read_exact(&mut skip).await?;
            }
            ATYP_IPV6 => {
                let mut skip = [0u8; 18];
                stream.read_exact(&mut skip).await?;
            }
            _ => {
                return Err(Error::Protocol("Invalid bound address type".into()));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Dialer for Socks5Dialer {
    async fn dial(&self, network: &str, address: &str) -> Result<TcpStream> {
        if network != "tcp" {
            return Err(Error::Unsupported(format!("network {}", network)));
        }

        let target = TargetAddr::parse(address)?;
        let mut stream = connect_tcp(&self.proxy_addr, self.local_ip).await?;
        self.handshake(&mut stream, &target).await?;
        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "home"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal no-auth SOCKS5 proxy that accepts one CONNECT and echoes
    /// the request target back as payload.
    async fn spawn_fake_proxy() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let mut greeting = [0u8; 2];
            stream.read_exact(&mut greeting).await.unwrap();
            let mut methods = vec![0u8; greeting[1] as usize];
            stream.read_exact(&mut methods).await.unwrap();
            stream.write_all(&[0x05, 0x00]).await.unwrap();

            let mut header = [0u8; 4];
            stream.read_exact(&mut header).await.unwrap();
            assert_eq!(header[1], 0x01);

            let mut rest = match header[3] {
                0x01 => vec![0u8; 6],
                0x03 => {
                    let mut len = [0u8; 1];
                    stream.read_exact(&mut len).await.unwrap();
                    vec![0u8; len[0] as usize + 2]
                }
                _ => vec![0u8; 18],
            };
            stream.read_exact(&mut rest).await.unwrap();

            stream
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            stream.write_all(b"connected").await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_connect_through_proxy() {
        let proxy = spawn_fake_proxy().await;
        let dialer = Socks5Dialer::new(&proxy.ip().to_string(), proxy.port(), None, None);

        let mut stream = dialer.dial("tcp", "example.com:80").await.unwrap();
        let mut buf = [0u8; 9];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"connected");
    }

    #[tokio::test]
    async fn test_refused_connect_surfaces_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 2];
            stream.read_exact(&mut greeting).await.unwrap();
            let mut methods = vec![0u8; greeting[1] as usize];
            stream.read_exact(&mut methods).await.unwrap();
            stream.write_all(&[0x05, 0x00]).await.unwrap();

            let mut header = [0u8; 4];
            stream.read_exact(&mut header).await.unwrap();
            let mut rest = vec![0u8; 6];
            stream.read_exact(&mut rest).await.unwrap();

            // Connection refused
            stream
                .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let dialer = Socks5Dialer::new(&addr.ip().to_string(), addr.port(), None, None);
        let err = dialer.dial("tcp", "10.0.0.1:80").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}

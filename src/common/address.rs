//! Target address parsing for dialers
//!
//! Dialers receive targets as `host:port` strings. The host may be a
//! dotted-quad, an IPv6 literal (bracket-less, as the SOCKS5 ingress
//! renders it, or bracketed), or a DNS name.

use std::net::{IpAddr, SocketAddr};

use tokio::net::lookup_host;

use crate::error::{Error, Result};

/// Parsed dial target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// IP socket address (IP + port)
    Ip(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl TargetAddr {
    /// Parse a `host:port` string. The port is everything after the last
    /// colon, so bare IPv6 literals parse without brackets.
    pub fn parse(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidAddress(s.to_string()))?;

        let host = host.strip_prefix('[').unwrap_or(host);
        let host = host.strip_suffix(']').unwrap_or(host);
        if host.is_empty() {
            return Err(Error::InvalidAddress(s.to_string()));
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(TargetAddr::Ip(SocketAddr::new(ip, port)));
        }
        Ok(TargetAddr::Domain(host.to_string(), port))
    }

    /// Resolve to socket addresses via the OS resolver.
    pub async fn resolve(&self) -> Result<Vec<SocketAddr>> {
        match self {
            TargetAddr::Ip(addr) => Ok(vec![*addr]),
            TargetAddr::Domain(domain, port) => {
                let addrs: Vec<SocketAddr> =
                    lookup_host((domain.as_str(), *port)).await?.collect();
                if addrs.is_empty() {
                    return Err(Error::DialFailed(format!(
                        "no addresses for {}",
                        domain
                    )));
                }
                Ok(addrs)
            }
        }
    }

    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ip(addr) => addr.ip().to_string(),
            TargetAddr::Domain(domain, _) => domain.clone(),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }
}

impl std::fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_parse_ipv4() {
        let addr = TargetAddr::parse("127.0.0.1:80").unwrap();
        assert_eq!(
            addr,
            TargetAddr::Ip(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 80))
        );
    }

    #[test]
    fn test_parse_domain() {
        let addr = TargetAddr::parse("example.com:443").unwrap();
        assert_eq!(addr, TargetAddr::Domain("example.com".to_string(), 443));
    }

    #[test]
    fn test_parse_bare_ipv6() {
        let addr = TargetAddr::parse("2001:db8::1:443").unwrap();
        let expected: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert_eq!(addr, TargetAddr::Ip(SocketAddr::new(expected.into(), 443)));
    }

    #[test]
    fn test_parse_bracketed_ipv6() {
        let addr = TargetAddr::parse("[::1]:80").unwrap();
        assert_eq!(
            addr,
            TargetAddr::Ip(SocketAddr::new(Ipv6Addr::LOCALHOST.into(), 80))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TargetAddr::parse("no-port").is_err());
        assert!(TargetAddr::parse("host:notaport").is_err());
        assert!(TargetAddr::parse(":80").is_err());
    }

    #[tokio::test]
    async fn test_resolve_ip_is_identity() {
        let addr = TargetAddr::parse("127.0.0.1:80").unwrap();
        let resolved = addr.resolve().await.unwrap();
        assert_eq!(resolved, vec!["127.0.0.1:80".parse().unwrap()]);
    }
}

//! SOCKS5 ingress handshake (RFC 1928 subset: CONNECT, no auth)

use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

pub(crate) const REP_SUCCESS: u8 = 0x00;
pub(crate) const REP_CONNECTION_REFUSED: u8 = 0x05;
const REP_CMD_NOT_SUPPORTED: u8 = 0x07;
const REP_ATYP_NOT_SUPPORTED: u8 = 0x08;

/// Run the ingress handshake and return the requested target as
/// `host:port`. IPv6 literals are rendered without brackets, matching
/// the router's address parser.
pub(crate) async fn handshake(stream: &mut TcpStream) -> Result<String> {
    // VER | NMETHODS
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;
    if buf[0] != SOCKS5_VERSION {
        return Err(Error::Protocol(format!(
            "unsupported SOCKS version: {}",
            buf[0]
        )));
    }

    // METHODS are read and discarded; the ingress enforces no auth
    let mut methods = vec![0u8; buf[1] as usize];
    stream.read_exact(&mut methods).await?;
    stream.write_all(&[SOCKS5_VERSION, AUTH_NONE]).await?;

    // VER | CMD | RSV | ATYP
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[1] != CMD_CONNECT {
        reply(stream, REP_CMD_NOT_SUPPORTED).await;
        return Err(Error::Protocol(format!(
            "unsupported command: {}",
            request[1]
        )));
    }

    let host = match request[3] {
        ATYP_IPV4 => {
            let mut ip = [0u8; 4];
            stream.read_exact(&mut ip).await?;
            Ipv4Addr::from(ip).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut domain = vec![0u8; len[0] as usize];
            stream.read_exact(&mut domain).await?;
            String::from_utf8_lossy(&domain).to_string()
        }
        ATYP_IPV6 => {
            let mut ip = [0u8; 16];
            stream.read_exact(&mut ip).await?;
            Ipv6Addr::from(ip).to_string()
        }
        other => {
            reply(stream, REP_ATYP_NOT_SUPPORTED).await;
            return Err(Error::Protocol(format!(
                "unsupported address type: {}",
                other
            )));
        }
    };

    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;

    Ok(format!("{}:{}", host, u16::from_be_bytes(port)))
}

/// Send a SOCKS5 reply with a dummy bound address of 0.0.0.0:0.
pub(crate) async fn reply(stream: &mut TcpStream, rep: u8) {
    // VER | REP | RSV | ATYP | BND.ADDR | BND.PORT
    let reply = [SOCKS5_VERSION, rep, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0];
    let _ = stream.write_all(&reply).await;
}

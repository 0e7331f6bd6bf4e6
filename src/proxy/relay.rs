//! Bidirectional relay
//!
//! Two independent one-directional copies. When a half completes (EOF
//! or read error), its write side is shut down (FIN) without touching
//! the opposite half. The relay itself returns when the *first* half
//! completes and then closes both streams, which unblocks the lagging
//! copy. Waiting for both halves would leak connections under peers
//! that never half-close.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Relay buffer size (32KB)
const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Relay bytes between two streams until the first direction finishes.
pub async fn run<A, B>(a: A, b: B)
where
    A: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    B: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    // Capacity 2 so a late-finishing half never stalls on send
    let (done_tx, mut done_rx) = mpsc::channel::<()>(2);
    let done_tx2 = done_tx.clone();

    let forward = tokio::spawn(async move {
        copy_half(&mut a_read, &mut b_write).await;
        let _ = b_write.shutdown().await;
        let _ = done_tx.send(()).await;
    });

    let backward = tokio::spawn(async move {
        copy_half(&mut b_read, &mut a_write).await;
        let _ = a_write.shutdown().await;
        let _ = done_tx2.send(()).await;
    });

    let _ = done_rx.recv().await;

    // Dropping the lagging task's halves closes both streams
    forward.abort();
    backward.abort();
}

async fn copy_half<R, W>(reader: &mut R, writer: &mut W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        if writer.write_all(&buf[..n]).await.is_err() {
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_relays_both_directions() {
        let (mut client, client_peer) = tokio::io::duplex(1024);
        let (mut server, server_peer) = tokio::io::duplex(1024);
        let handle = tokio::spawn(run(client_peer, server_peer));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_first_half_to_finish_ends_relay() {
        let (mut client, client_peer) = tokio::io::duplex(1024);
        let (server, server_peer) = tokio::io::duplex(1024);
        let handle = tokio::spawn(run(client_peer, server_peer));

        // Client-side EOF alone terminates the relay even though the
        // server side never closes
        client.shutdown().await.unwrap();
        handle.await.unwrap();

        drop(server);
    }
}

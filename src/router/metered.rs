//! Byte-metering stream wrapper

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::metrics::Metrics;

/// Transparent wrapper over a byte stream that debits a mode's byte
/// counter on every successful read and write.
///
/// Construction registers the connection with [`Metrics`] (active count
/// goes up); dropping the wrapper de-registers it.
#[derive(Debug)]
pub struct MeteredStream<S> {
    inner: S,
    mode: &'static str,
    metrics: Arc<Metrics>,
}

impl<S> MeteredStream<S> {
    pub fn new(inner: S, mode: &'static str, metrics: Arc<Metrics>) -> Self {
        metrics.conn_opened();
        Self {
            inner,
            mode,
            metrics,
        }
    }

    /// Mode tag this stream is accounted against.
    pub fn mode(&self) -> &'static str {
        self.mode
    }
}

impl<S> Drop for MeteredStream<S> {
    fn drop(&mut self) {
        self.metrics.conn_closed();
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for MeteredStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);

        if let Poll::Ready(Ok(())) = result {
            let n = buf.filled().len() - before;
            this.metrics.add_bytes(this.mode, n as u64);
        }

        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for MeteredStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);

        if let Poll::Ready(Ok(n)) = result {
            this.metrics.add_bytes(this.mode, n as u64);
        }

        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_meters_reads_and_writes() {
        let metrics = Arc::new(Metrics::new());
        let (local, mut remote) = tokio::io::duplex(1024);
        let mut metered = MeteredStream::new(local, "direct", metrics.clone());

        metered.write_all(b"hello").await.unwrap();
        remote.write_all(b"world!").await.unwrap();

        let mut buf = [0u8; 6];
        metered.read_exact(&mut buf).await.unwrap();

        assert_eq!(metrics.get_bytes("direct"), 11);
        assert_eq!(metrics.get_bytes("warp"), 0);
    }

    #[tokio::test]
    async fn test_active_count_follows_lifetime() {
        let metrics = Arc::new(Metrics::new());
        let (local, _remote) = tokio::io::duplex(64);

        let metered = MeteredStream::new(local, "home", metrics.clone());
        assert_eq!(metrics.active_connections(), 1);

        drop(metered);
        assert_eq!(metrics.active_connections(), 0);
        assert_eq!(metrics.snapshot().total_connections, 1);
    }
}

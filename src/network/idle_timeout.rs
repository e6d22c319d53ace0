//! Per-connection inactivity deadline.
//!
//! Every accepted socket is wrapped in an [`IdleTimeoutStream`] before it reaches the HTTP
//! server. A read or write that makes no progress for the configured duration fails with
//! `ErrorKind::TimedOut`, which makes the server drop the connection. This bounds peers that
//! stop sending a request as well as peers that stop reading their response.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Sleep};

pub struct IdleTimeoutStream<S> {
    inner: S,
    timeout: Duration,
    read_deadline: Option<Pin<Box<Sleep>>>,
    write_deadline: Option<Pin<Box<Sleep>>>,
}

impl<S> IdleTimeoutStream<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            read_deadline: None,
            write_deadline: None,
        }
    }
}

/// Arms the deadline on the first pending poll and reports `TimedOut` once it elapses.
fn poll_deadline<T>(
    deadline: &mut Option<Pin<Box<Sleep>>>,
    timeout: Duration,
    cx: &mut Context<'_>,
    direction: &str,
) -> Poll<io::Result<T>> {
    let timer = deadline.get_or_insert_with(|| Box::pin(sleep(timeout)));
    match timer.as_mut().poll(cx) {
        Poll::Ready(()) => Poll::Ready(Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{} stalled for {:?}", direction, timeout),
        ))),
        Poll::Pending => Poll::Pending,
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for IdleTimeoutStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.read_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(&mut this.read_deadline, this.timeout, cx, "read"),
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for IdleTimeoutStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(&mut this.write_deadline, this.timeout, cx, "write"),
        }
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write_vectored(cx, bufs) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(&mut this.write_deadline, this.timeout, cx, "write"),
        }
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(&mut this.write_deadline, this.timeout, cx, "flush"),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out_read() {
        let (_client, server) = duplex(64);
        let mut stream = IdleTimeoutStream::new(server, Duration::from_secs(5));

        let mut buf = [0u8; 16];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_not_reading_times_out_write() {
        let (_client, server) = duplex(8);
        let mut stream = IdleTimeoutStream::new(server, Duration::from_secs(5));

        // The pipe holds 8 bytes and nobody drains it
        let err = stream.write_all(&[b'x'; 64]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_resets_deadline() {
        // Each pause stays under the deadline even though their sum does not
        let mock = tokio_test::io::Builder::new()
            .wait(Duration::from_secs(4))
            .read(b"he")
            .wait(Duration::from_secs(4))
            .read(b"ll")
            .wait(Duration::from_secs(4))
            .read(b"o")
            .build();
        let mut stream = IdleTimeoutStream::new(mock, Duration::from_secs(5));

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }
}

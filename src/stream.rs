use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

/// A connected socket, plain or wrapped in TLS. The session layer is
/// generic over nothing — it simply holds one of these and drives it
/// through the ordinary `AsyncRead`/`AsyncWrite` traits, the same shape
/// `socket-flow`'s own `SocketFlowStream` takes for its client/server
/// split, minus the client-only constructors this crate has no use for.
pub enum SocketFlowStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl SocketFlowStream {
    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        match self {
            SocketFlowStream::Plain(s) => s.peer_addr(),
            SocketFlowStream::Tls(s) => s.get_ref().0.peer_addr(),
        }
    }
}

impl AsyncRead for SocketFlowStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            SocketFlowStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketFlowStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SocketFlowStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            SocketFlowStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(s) => Pin::new(s).poll_flush(cx),
            SocketFlowStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            SocketFlowStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

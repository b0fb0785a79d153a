use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::error::NetError;
use crate::target::Network;
use crate::util::with_deadline;

/// An established stream socket, TCP or unix-domain.
#[derive(Debug)]
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    /// IP of the remote end; `None` for unix sockets.
    pub fn peer_ip(&self) -> Option<IpAddr> {
        match self {
            Transport::Tcp(s) => s.peer_addr().ok().map(|a| a.ip()),
            #[cfg(unix)]
            Transport::Unix(_) => None,
        }
    }
}

/// Open a connection to `addr` within `timeout`. For TCP, `addr` may still
/// be a host name; the dialer resolves it.
pub async fn dial(network: Network, addr: &str, timeout: Duration) -> Result<Transport, NetError> {
    match network {
        Network::Tcp => {
            let stream = with_deadline("dial", timeout, TcpStream::connect(addr)).await?;
            Ok(Transport::Tcp(stream))
        }
        #[cfg(unix)]
        Network::Unix => {
            let stream = with_deadline("dial", timeout, UnixStream::connect(addr)).await?;
            Ok(Transport::Unix(stream))
        }
        #[cfg(not(unix))]
        Network::Unix => Err(NetError::UnixUnsupported),
    }
}

impl AsyncRead for Transport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Transport::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Transport::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Transport::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Transport::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

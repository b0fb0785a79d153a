//! Plain byte relay: send input to a socket, then copy the reply out.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::NetError;
use crate::prober::tcp_connect;
use crate::prober::tls;
use crate::target::Target;

/// Bytes moved in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Relayed {
    pub sent: u64,
    pub received: u64,
}

/// Connect to `target`, write all of `input`, then copy everything the peer
/// sends to `output` until it closes.
pub async fn relay<R, W>(
    target: &Target,
    tls: Option<&TlsConnector>,
    dial_timeout: Duration,
    handshake_timeout: Duration,
    input: R,
    output: W,
) -> Result<Relayed, NetError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let transport = tcp_connect::dial(target.network(), &target.to_string(), dial_timeout).await?;
    match tls {
        None => Ok(pump(transport, input, output).await?),
        Some(connector) => {
            let stream = tls::handshake(connector, &target.server_name(), transport, handshake_timeout).await?;
            Ok(pump(stream, input, output).await?)
        }
    }
}

async fn pump<S, R, W>(mut stream: S, mut input: R, mut output: W) -> io::Result<Relayed>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let sent = tokio::io::copy(&mut input, &mut stream).await?;
    stream.flush().await?;
    debug!("relayed {} byte(s) to peer", sent);

    let mut received = 0u64;
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            // TLS peers that hang up without close_notify
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        output.write_all(&buf[..n]).await?;
        received += n as u64;
    }
    output.flush().await?;
    Ok(Relayed { sent, received })
}

// ABOUTME: TCP relay exposing one discovered Unix socket on its own port
// ABOUTME: Accept loop plus full-duplex byte copying with half-close propagation

//! TCP relay for discovered Unix sockets.
//!
//! Each discovered socket gets one [`SocketRelay`]: a TCP listener drawn from
//! the shared [`PortAllocator`] whose every client is bridged to the socket.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         TCP client                              │
//! └─────────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼ TCP connection
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         SocketRelay                             │
//! │  ┌──────────────────┐    ┌──────────────────────────────────┐  │
//! │  │  TCP Listener    │ ──▶│  relay_connection                │  │
//! │  │  (port 51112)    │    │  client→socket | socket→client   │  │
//! │  └──────────────────┘    └──────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼ Unix socket
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    /var/run/docker.sock                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payload is never inspected or modified. When one direction reaches
//! end-of-stream its destination's write side is shut down, so the peer
//! sees EOF while the other direction keeps flowing.
//!
//! # Example
//!
//! ```ignore
//! let allocator = Arc::new(PortAllocator::new(51112, IpAddr::V4(Ipv4Addr::UNSPECIFIED)));
//! let registry = Arc::new(Registry::new());
//!
//! tokio::spawn(serve_socket(PathBuf::from("/var/run/docker.sock"), allocator, registry));
//! ```

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixStream};
use tracing::{debug, info, warn};

use super::port_allocator::{AllocError, PortAllocator};
use super::registry::Registry;

/// Errors that can occur during TCP relay operation
#[derive(Debug, Error)]
pub enum RelayError {
    /// The allocator could not supply a port
    #[error("Unable to make listener: {0}")]
    NoListener(#[from] AllocError),

    /// The bound listener has no usable local address
    #[error("Failed to read listener address: {0}")]
    LocalAddr(#[source] io::Error),

    /// Failed to connect to Unix socket
    #[error("Unable to connect to socket: {0}")]
    SocketConnectionFailed(#[source] io::Error),
}

/// Byte counts for one finished relayed connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied from the client into the socket
    pub forward: u64,

    /// Bytes copied from the socket back to the client
    pub back: u64,
}

/// TCP listener bound on behalf of one Unix socket.
#[derive(Debug)]
pub struct SocketRelay {
    /// Path to the Unix socket to relay traffic to
    socket_path: PathBuf,

    /// Listener drawn from the shared allocator
    listener: TcpListener,

    /// Address the listener is bound to
    local_addr: SocketAddr,
}

impl SocketRelay {
    /// Bind a listener for `socket_path` on the allocator's next free port.
    pub async fn bind(socket_path: PathBuf, allocator: &PortAllocator) -> Result<Self, RelayError> {
        let listener = allocator.listen().await?;
        let local_addr = listener.local_addr().map_err(RelayError::LocalAddr)?;

        Ok(Self {
            socket_path,
            listener,
            local_addr,
        })
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept clients until the listener fails.
    ///
    /// Each client is relayed on its own task. There is no way back from an
    /// accept error: the listener is dropped and this socket stays unserved.
    pub async fn run(self) {
        let Self {
            socket_path,
            listener,
            local_addr,
        } = self;
        let socket_path = Arc::new(socket_path);

        loop {
            match listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    let socket_path = Arc::clone(&socket_path);
                    tokio::spawn(async move {
                        if let Err(e) = relay_connection(tcp_stream, peer_addr.to_string(), &socket_path).await {
                            warn!(
                                peer = %peer_addr,
                                socket = %socket_path.display(),
                                error = %e,
                                "Connection relay failed"
                            );
                        }
                    });
                }
                Err(e) => {
                    warn!(addr = %local_addr, error = %e, "Error accepting connection");
                    break;
                }
            }
        }
    }
}

/// Full relay lifecycle for one discovered socket.
///
/// Binds a port, records the mapping, then serves clients until the listener
/// fails. If no port can be had the socket is logged and abandoned.
pub async fn serve_socket(socket_path: PathBuf, allocator: Arc<PortAllocator>, registry: Arc<Registry>) {
    let relay = match SocketRelay::bind(socket_path.clone(), &allocator).await {
        Ok(relay) => relay,
        Err(e) => {
            warn!(socket = %socket_path.display(), error = %e, "Not serving socket");
            return;
        }
    };

    info!(
        addr = %relay.local_addr(),
        socket = %relay.socket_path().display(),
        "Listening for connections to socket"
    );
    registry.register(relay.local_addr(), relay.socket_path()).await;

    relay.run().await;
}

/// Bridge one accepted client to the Unix socket at `socket_path`.
///
/// If the socket cannot be reached, a one-line diagnostic is written to the
/// client instead and the connection is closed. Otherwise bytes are copied in
/// both directions until each side has finished; copy errors are logged and
/// end only their own direction.
pub async fn relay_connection<S>(
    mut client: S,
    peer: String,
    socket_path: &Path,
) -> Result<RelayStats, RelayError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let tag = format!("{peer} -> {}", socket_path.display());
    debug!(tag = %tag, "Connected");

    let unix_stream = match UnixStream::connect(socket_path).await {
        Ok(stream) => stream,
        Err(e) => {
            let message = format!("[{tag}] Unable to connect to socket: {e}");
            debug!("{message}");
            if let Err(write_err) = client.write_all(message.as_bytes()).await {
                debug!(tag = %tag, error = %write_err, "Could not report failure to client");
            }
            let _ = client.shutdown().await;
            return Err(RelayError::SocketConnectionFailed(e));
        }
    };

    let (client_read, client_write) = tokio::io::split(client);
    let (unix_read, unix_write) = unix_stream.into_split();

    let (forward, back) = tokio::join!(
        copy_then_close(client_read, unix_write, &tag, "to socket"),
        copy_then_close(unix_read, client_write, &tag, "to client"),
    );

    debug!(tag = %tag, forward = forward, back = back, "Done");
    Ok(RelayStats { forward, back })
}

/// Copy one direction, then shut down the destination's write side.
///
/// `AsyncWrite::poll_shutdown` is the half-close hook: TCP and Unix write
/// halves send FIN and keep reading, other writers treat it as a full close.
async fn copy_then_close<R, W>(mut reader: R, mut writer: W, tag: &str, direction: &str) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut copied = 0;
    let mut buf = vec![0u8; 32 * 1024];

    // tokio::io::copy loses the count on error
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(tag = %tag, direction = direction, error = %e, "Error sending data");
                break;
            }
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            debug!(tag = %tag, direction = direction, error = %e, "Error sending data");
            break;
        }
        copied += n as u64;
    }

    if let Err(e) = writer.shutdown().await {
        debug!(tag = %tag, direction = direction, error = %e, "Half-close failed");
    }
    copied
}

// ABOUTME: Directory listener that tells clients which port serves which socket
// ABOUTME: Bound to the first allocated port; writes the registry once per connection

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::port_allocator::PortAllocator;
use super::registry::Registry;
use super::tcp_relay::RelayError;

/// Plain-text directory of port to socket mappings.
///
/// Clients send nothing; each one gets the current listing and is closed.
#[derive(Debug)]
pub struct DirectoryServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl DirectoryServer {
    /// Take the allocator's next free port for directory queries.
    ///
    /// Called before any socket relay, so it claims the first port handed out.
    pub async fn bind(allocator: &PortAllocator) -> Result<Self, RelayError> {
        let listener = allocator.listen().await?;
        let local_addr = listener.local_addr().map_err(RelayError::LocalAddr)?;

        info!(addr = %local_addr, "Listening for list queries");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Answer list queries until accept fails.
    pub async fn serve(self, registry: Arc<Registry>) {
        loop {
            match self.listener.accept().await {
                Ok((mut stream, peer_addr)) => {
                    let registry = Arc::clone(&registry);
                    tokio::spawn(async move {
                        if let Err(e) = write_listing(&mut stream, &registry).await {
                            debug!(peer = %peer_addr, error = %e, "List query failed");
                            return;
                        }
                        debug!(peer = %peer_addr, "List query");
                    });
                }
                Err(e) => {
                    warn!(addr = %self.local_addr, error = %e, "Unable to accept list query client");
                    break;
                }
            }
        }
    }
}

/// Write one registry snapshot to `writer` and close it.
pub async fn write_listing<W>(writer: &mut W, registry: &Registry) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let listing = registry.snapshot().await;
    writer.write_all(&listing).await?;
    writer.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expose::port_allocator::AllocError;
    use pretty_assertions::assert_eq;
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::Path;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    async fn query(addr: SocketAddr) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let mut listing = String::new();
        stream.read_to_string(&mut listing).await.expect("read listing");
        listing
    }

    #[tokio::test]
    async fn test_write_listing_placeholder() {
        let registry = Registry::new();
        let mut out = Vec::new();

        write_listing(&mut out, &registry).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "none yet\n");
    }

    #[tokio::test]
    async fn test_directory_serves_live_registry() {
        let allocator = PortAllocator::new(43100, IpAddr::V4(Ipv4Addr::LOCALHOST));
        let registry = Arc::new(Registry::new());

        let directory = DirectoryServer::bind(&allocator).await.unwrap();
        let addr = directory.local_addr();
        tokio::spawn(directory.serve(Arc::clone(&registry)));

        assert_eq!(query(addr).await, "none yet\n");

        let mapped = SocketAddr::from(([0, 0, 0, 0], 51112));
        registry.register(mapped, Path::new("/tmp/docker.sock")).await;
        assert_eq!(query(addr).await, "0.0.0.0:51112 -> /tmp/docker.sock\n");

        // Repeat queries see the same lines
        assert_eq!(query(addr).await, "0.0.0.0:51112 -> /tmp/docker.sock\n");
    }

    #[tokio::test]
    async fn test_directory_bind_exhausted() {
        let allocator = PortAllocator::new(0, IpAddr::V4(Ipv4Addr::LOCALHOST));
        let result = DirectoryServer::bind(&allocator).await;
        assert!(matches!(
            result,
            Err(RelayError::NoListener(AllocError::NoPortsLeft))
        ));
    }
}

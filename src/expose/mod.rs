// ABOUTME: Socket exposure engine: discover Unix sockets, give each a TCP port
//
// This module finds Unix domain sockets on the host and relays each one over
// its own TCP listener. The first port allocated serves a plain-text directory
// of every mapping made so far.
//
// Key components:
// - port_allocator: shared wrapping port cursor and listener binding
// - discovery: recursive walk with pruning, regex filter and seen-set
// - tcp_relay: per-socket accept loop and per-connection byte relay
// - registry: append-only mapping directory and the seen-set
// - directory: listener answering directory queries

pub mod directory;
pub mod discovery;
pub mod port_allocator;
pub mod registry;
pub mod tcp_relay;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::ExposeConfig;

// Re-exports for convenient access
pub use directory::DirectoryServer;
pub use discovery::{DiscoveryError, SocketDiscovery};
pub use port_allocator::{AllocError, PortAllocator};
pub use registry::{Registry, SeenSet, SocketRecord, EMPTY_LISTING};
pub use tcp_relay::{relay_connection, serve_socket, RelayError, RelayStats, SocketRelay};

/// Conditions that stop the whole process
#[derive(Debug, Error)]
pub enum ExposeError {
    /// The socket path filter does not compile
    #[error("Error compiling regex: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The directory listener could not get a port
    #[error("Unable to listen for list queries: {0}")]
    DirectoryUnavailable(#[source] RelayError),

    /// A scan cycle failed as a whole
    #[error(transparent)]
    Scan(#[from] DiscoveryError),
}

/// Ties discovery, port allocation, relays and the directory together.
pub struct Exposer {
    discovery: SocketDiscovery,
    allocator: Arc<PortAllocator>,
    registry: Arc<Registry>,
    scan_interval: Duration,
}

impl Exposer {
    /// Build the engine from configuration. Fails only on a bad path pattern.
    pub fn new(config: &ExposeConfig) -> Result<Self, ExposeError> {
        let pattern = config.compile_pattern()?;
        let discovery = SocketDiscovery::new(
            config.scan_root.clone(),
            pattern,
            config.prune_prefixes.clone(),
            Arc::new(SeenSet::new()),
        );

        Ok(Self {
            discovery,
            allocator: Arc::new(PortAllocator::new(config.start_port, config.bind_addr)),
            registry: Arc::new(Registry::new()),
            scan_interval: config.scan_interval,
        })
    }

    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub const fn allocator(&self) -> &Arc<PortAllocator> {
        &self.allocator
    }

    pub const fn discovery(&self) -> &SocketDiscovery {
        &self.discovery
    }

    /// Bind the directory listener and start serving it in the background.
    ///
    /// Returns once the listener is bound, so it always owns the first port.
    pub async fn start_directory(&self) -> Result<DirectoryHandle, ExposeError> {
        let directory = DirectoryServer::bind(&self.allocator)
            .await
            .map_err(ExposeError::DirectoryUnavailable)?;
        let addr = directory.local_addr();
        let task = tokio::spawn(directory.serve(Arc::clone(&self.registry)));

        Ok(DirectoryHandle { addr, task })
    }

    /// Run one scan cycle, starting a relay for every new socket.
    ///
    /// Relays are spawned and left running; this returns as soon as the walk
    /// finishes, with the number of relays started.
    pub async fn scan_once(&self) -> Result<usize, ExposeError> {
        let dispatched = self
            .discovery
            .scan(|path: PathBuf| {
                tokio::spawn(serve_socket(
                    path,
                    Arc::clone(&self.allocator),
                    Arc::clone(&self.registry),
                ));
            })
            .await?;

        debug!(
            root = %self.discovery.root().display(),
            new_sockets = dispatched,
            "Scan complete"
        );
        Ok(dispatched)
    }

    /// Serve the directory, then scan forever.
    ///
    /// Only returns on a fatal error.
    pub async fn run(self) -> Result<(), ExposeError> {
        let directory = self.start_directory().await?;
        info!(addr = %directory.addr, "Directory ready");

        loop {
            self.scan_once().await?;
            tokio::time::sleep(self.scan_interval).await;
        }
    }
}

/// Running directory listener
#[derive(Debug)]
pub struct DirectoryHandle {
    /// Where directory queries are answered
    pub addr: std::net::SocketAddr,

    /// Background accept loop
    pub task: tokio::task::JoinHandle<()>,
}

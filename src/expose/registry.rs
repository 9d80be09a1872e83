// ABOUTME: Append-only directory of listen-address to socket-path mappings
// ABOUTME: Also holds the seen-set that keeps each socket path dispatched once

use std::collections::HashSet;
use std::net::SocketAddr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::info;

/// Text served to directory clients before any socket is registered
pub const EMPTY_LISTING: &str = "none yet\n";

/// A socket that has been bound to a TCP listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketRecord {
    /// Address the relay listens on
    pub listen_addr: SocketAddr,

    /// Unix socket the relay forwards to
    pub socket_path: PathBuf,
}

impl SocketRecord {
    /// Render as a directory line, `<addr> -> <path>\n`.
    ///
    /// The path is written as its raw bytes, so names that are not UTF-8 reach
    /// clients unchanged.
    pub fn render_line(&self) -> Vec<u8> {
        let mut line = format!("{} -> ", self.listen_addr).into_bytes();
        line.extend_from_slice(self.socket_path.as_os_str().as_bytes());
        line.push(b'\n');
        line
    }
}

/// Ordered, append-only list of active mappings.
///
/// Entries are never removed, even after the relay's listener fails or the
/// socket disappears from disk.
#[derive(Debug, Default)]
pub struct Registry {
    records: Mutex<Vec<SocketRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mapping and return the stored record.
    pub async fn register(&self, listen_addr: SocketAddr, socket_path: &Path) -> SocketRecord {
        let record = SocketRecord {
            listen_addr,
            socket_path: socket_path.to_path_buf(),
        };
        self.records.lock().await.push(record.clone());

        info!(
            addr = %listen_addr,
            socket = %socket_path.display(),
            "Registered socket mapping"
        );
        record
    }

    /// Current directory text, or [`EMPTY_LISTING`] when nothing is registered.
    pub async fn snapshot(&self) -> Vec<u8> {
        let records = self.records.lock().await;
        if records.is_empty() {
            return EMPTY_LISTING.as_bytes().to_vec();
        }

        records.iter().flat_map(SocketRecord::render_line).collect()
    }

    /// Copy of every registered record, in registration order.
    pub async fn records(&self) -> Vec<SocketRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

/// Socket paths already handed to a relay.
///
/// Grows for the life of the process; a path is never forgotten.
#[derive(Debug, Default)]
pub struct SeenSet {
    paths: Mutex<HashSet<PathBuf>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path`, returning `true` only for the first caller to see it.
    ///
    /// Membership check and insert happen under one lock acquisition.
    pub async fn insert_new(&self, path: &Path) -> bool {
        self.paths.lock().await.insert(path.to_path_buf())
    }

    pub async fn contains(&self, path: &Path) -> bool {
        self.paths.lock().await.contains(path)
    }

    pub async fn len(&self) -> usize {
        self.paths.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.paths.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], port))
    }

    #[tokio::test]
    async fn test_empty_registry_snapshot() {
        let registry = Registry::new();
        assert!(registry.is_empty().await);
        assert_eq!(registry.snapshot().await, b"none yet\n");
    }

    #[tokio::test]
    async fn test_register_renders_line() {
        let registry = Registry::new();
        let record = registry
            .register(addr(51112), Path::new("/tmp/docker.sock"))
            .await;

        assert_eq!(record.render_line(), b"0.0.0.0:51112 -> /tmp/docker.sock\n");
        assert_eq!(registry.snapshot().await, b"0.0.0.0:51112 -> /tmp/docker.sock\n");
    }

    #[tokio::test]
    async fn test_non_utf8_path_rendered_verbatim() {
        use std::ffi::OsStr;

        let registry = Registry::new();
        let path = Path::new(OsStr::from_bytes(b"/tmp/\xffdocker.sock"));
        let record = registry.register(addr(51112), path).await;

        let expected: &[u8] = b"0.0.0.0:51112 -> /tmp/\xffdocker.sock\n";
        assert_eq!(record.render_line(), expected);
        assert_eq!(registry.snapshot().await, expected);
    }

    #[tokio::test]
    async fn test_registry_preserves_order_and_lines() {
        let registry = Registry::new();
        registry.register(addr(51112), Path::new("/tmp/a.sock")).await;
        let before = registry.snapshot().await;

        registry.register(addr(51113), Path::new("/run/ssh-agent.sock")).await;
        let after = registry.snapshot().await;

        // Earlier lines survive every later append
        assert!(after.starts_with(&before));
        assert_eq!(
            after,
            b"0.0.0.0:51112 -> /tmp/a.sock\n0.0.0.0:51113 -> /run/ssh-agent.sock\n"
        );
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_records_returns_copies() {
        let registry = Registry::new();
        registry.register(addr(51112), Path::new("/tmp/x.sock")).await;

        let records = registry.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].socket_path, PathBuf::from("/tmp/x.sock"));
        assert_eq!(records[0].listen_addr, addr(51112));
    }

    #[tokio::test]
    async fn test_seen_set_insert_once() {
        let seen = SeenSet::new();
        let path = Path::new("/tmp/tmux-1000/default");

        assert!(seen.insert_new(path).await);
        assert!(!seen.insert_new(path).await);
        assert!(seen.contains(path).await);
        assert_eq!(seen.len().await, 1);
    }

    #[tokio::test]
    async fn test_seen_set_concurrent_inserts_single_winner() {
        let seen = Arc::new(SeenSet::new());
        let mut handles = Vec::new();

        for _ in 0..16 {
            let seen = Arc::clone(&seen);
            handles.push(tokio::spawn(async move {
                seen.insert_new(Path::new("/tmp/docker.sock")).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("task panicked") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}

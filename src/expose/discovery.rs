// ABOUTME: Recursive filesystem walk that finds Unix sockets worth exposing
// ABOUTME: Prunes pseudo-filesystems, filters by regex, and dispatches each new path once

//! Socket discovery.
//!
//! One call to [`SocketDiscovery::scan`] is one scan cycle: a full walk of the
//! configured root. Entries that cannot be read are skipped and the walk
//! carries on; only an unreadable root fails the cycle. Symlinks are never
//! followed.

use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, trace};

use super::registry::SeenSet;

/// Errors that end a scan cycle
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The scan root itself could not be examined
    #[error("Failed to walk file tree at {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for discovery operations
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Walks a directory tree looking for matching, not-yet-seen sockets.
pub struct SocketDiscovery {
    /// Top of the walk
    root: PathBuf,

    /// Full socket paths must match this
    pattern: Regex,

    /// Directories under any of these are not descended into
    prune_prefixes: Vec<PathBuf>,

    /// Paths already dispatched, shared across cycles
    seen: Arc<SeenSet>,
}

impl SocketDiscovery {
    #[must_use]
    pub const fn new(
        root: PathBuf,
        pattern: Regex,
        prune_prefixes: Vec<PathBuf>,
        seen: Arc<SeenSet>,
    ) -> Self {
        Self {
            root,
            pattern,
            prune_prefixes,
            seen,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn seen(&self) -> &Arc<SeenSet> {
        &self.seen
    }

    /// Whether a directory's path begins with one of the pruned prefixes.
    ///
    /// This is a plain byte prefix, not a component match: `/dev` also prunes
    /// `/devel`.
    pub fn is_pruned(&self, dir: &Path) -> bool {
        let dir = dir.as_os_str().as_bytes();
        self.prune_prefixes
            .iter()
            .any(|prefix| dir.starts_with(prefix.as_os_str().as_bytes()))
    }

    /// Whether a socket path passes the configured filter.
    pub fn matches(&self, path: &Path) -> bool {
        self.pattern.is_match(&path.to_string_lossy())
    }

    /// Walk the tree once, calling `dispatch` for each newly found socket.
    ///
    /// `dispatch` must not block; the relay it starts runs on its own task.
    /// Children are visited in lexical order. Returns how many sockets were
    /// dispatched during this cycle.
    pub async fn scan<F>(&self, mut dispatch: F) -> DiscoveryResult<usize>
    where
        F: FnMut(PathBuf),
    {
        let root_meta = fs::symlink_metadata(&self.root).await.map_err(|source| {
            DiscoveryError::RootUnreadable {
                path: self.root.clone(),
                source,
            }
        })?;

        let mut pending = vec![(self.root.clone(), root_meta.file_type())];
        let mut dispatched = 0;

        while let Some((path, file_type)) = pending.pop() {
            if file_type.is_dir() {
                if self.is_pruned(&path) {
                    trace!(dir = %path.display(), "Pruned directory");
                    continue;
                }
                let mut children = Self::read_children(&path).await;
                // Stack is LIFO; reverse so the smallest name is popped first
                children.sort_by(|a, b| b.0.cmp(&a.0));
                pending.extend(children);
                continue;
            }

            if !file_type.is_socket() || !self.matches(&path) {
                continue;
            }

            if !self.seen.insert_new(&path).await {
                continue;
            }

            debug!(socket = %path.display(), "Discovered socket");
            dispatch(path);
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// List a directory's entries with their (non-followed) file types.
    ///
    /// Anything unreadable is dropped silently.
    async fn read_children(dir: &Path) -> Vec<(PathBuf, std::fs::FileType)> {
        let mut children = Vec::new();

        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                trace!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                return children;
            }
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => match entry.file_type().await {
                    Ok(file_type) => children.push((entry.path(), file_type)),
                    Err(e) => {
                        trace!(path = %entry.path().display(), error = %e, "Skipping entry");
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    trace!(dir = %dir.display(), error = %e, "Directory listing cut short");
                    break;
                }
            }
        }

        children
    }
}

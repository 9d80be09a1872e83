// ABOUTME: Shared wrapping port cursor and TCP listener allocation
// ABOUTME: Tries successive ports until one binds or the 16-bit space is exhausted

//! Port allocation for socket relays.
//!
//! Every listener in the process draws its port from one [`PortAllocator`].
//! The cursor starts at the configured port, advances by one on every read and
//! wraps at 65536. Reaching port 0 after a wrap means every candidate has been
//! handed out once, so allocation reports [`AllocError::NoPortsLeft`].
//!
//! The OS-level bind is what guarantees a port is never held by two
//! listeners at once; a failed bind simply moves on to the next candidate.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::debug;

/// Errors that can occur while allocating a listener
#[derive(Debug, Error)]
pub enum AllocError {
    /// The cursor wrapped back to 0 without a successful bind
    #[error("no more ports")]
    NoPortsLeft,
}

/// Hands out TCP listeners on successive ports from a shared cursor.
#[derive(Debug)]
pub struct PortAllocator {
    /// Next port to try; 0 is the exhaustion sentinel
    cursor: AtomicU16,

    /// Address every listener binds to
    bind_addr: IpAddr,
}

impl PortAllocator {
    /// Create an allocator whose first candidate is `start_port`.
    ///
    /// A `start_port` of 0 yields an allocator that is exhausted from the
    /// outset, since 0 doubles as the "wrapped around" marker.
    pub const fn new(start_port: u16, bind_addr: IpAddr) -> Self {
        Self {
            cursor: AtomicU16::new(start_port),
            bind_addr,
        }
    }

    /// Return the current candidate and advance the cursor, wrapping at 65536.
    pub fn next_port(&self) -> u16 {
        // fetch_add on AtomicU16 wraps, which is exactly the modulo-65536 step
        self.cursor.fetch_add(1, Ordering::SeqCst)
    }

    /// Peek at the next candidate without consuming it.
    pub fn cursor(&self) -> u16 {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Address listeners are bound to.
    pub const fn bind_addr(&self) -> IpAddr {
        self.bind_addr
    }

    /// Bind a listener on the next free port.
    ///
    /// Candidates that fail to bind are logged and skipped. The cursor is
    /// advanced for every attempt, so concurrent callers interleave on the
    /// same sequence.
    pub async fn listen(&self) -> Result<TcpListener, AllocError> {
        let mut port = self.next_port();
        while port != 0 {
            let addr = SocketAddr::new(self.bind_addr, port);
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    debug!(port = port, "Bound listener");
                    return Ok(listener);
                }
                Err(e) => {
                    debug!(addr = %addr, error = %e, "Cannot listen, trying next port");
                }
            }
            port = self.next_port();
        }

        Err(AllocError::NoPortsLeft)
    }
}

//! Guest connection establishment.
//!
//! A discovered socket file is connected to with a non-blocking stream
//! socket. A refused connect is normal — the hypervisor creates the file
//! before the guest agent binds its end — and goes to the retry queue.
//! Anything else is permanent and the attempt is abandoned.

use std::io;
use std::path::{Path, PathBuf};

use tokio::net::UnixStream;
use tracing::{debug, warn};

use crate::discovery::instance_from_filename;

/// Result of one connection attempt.
#[derive(Debug)]
pub enum ConnectOutcome {
    /// Connected; the caller registers the stream.
    Connected(UnixStream),

    /// Guest side not listening yet; retry after the fixed delay.
    RetryLater,

    /// Permanent failure; the attempt is dropped and reported.
    Failed(io::Error),
}

/// Try to connect to a guest socket once, without blocking the reactor.
pub async fn attempt_connect(path: &Path) -> ConnectOutcome {
    match UnixStream::connect(path).await {
        Ok(stream) => ConnectOutcome::Connected(stream),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::WouldBlock
            ) =>
        {
            debug!(path = %path.display(), "connection refused, queuing retry");
            ConnectOutcome::RetryLater
        }
        Err(e) => ConnectOutcome::Failed(e),
    }
}

/// List matching socket files already present in the directory. Run at
/// startup so instances that predate the daemon are picked up without
/// waiting for a filesystem event.
pub fn scan_existing(dir: &Path) -> Vec<(String, PathBuf)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "initial socket directory scan failed");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let filename = entry.file_name();
        let Some(name) = filename.to_str().and_then(instance_from_filename) else {
            continue;
        };
        found.push((name.to_string(), entry.path()));
    }
    found
}

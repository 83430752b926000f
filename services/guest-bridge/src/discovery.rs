//! Guest socket discovery.
//!
//! The hypervisor creates one socket file per guest in a known directory,
//! named `guestlink.<instance>.sock`. Creation and deletion of matching
//! files drive the connection lifecycle; everything else in the directory
//! is ignored. Events are delivered by the `notify` crate on its own
//! thread and forwarded over a channel so that all state changes happen
//! on the reactor task.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::BridgeError;

/// Literal filename prefix of a guest socket file.
pub const SOCKET_PREFIX: &str = "guestlink.";

/// Literal filename suffix of a guest socket file.
pub const SOCKET_SUFFIX: &str = ".sock";

/// Upper bound on the instance token length, in bytes.
pub const INSTANCE_NAME_MAX: usize = 64;

/// A socket-directory change relevant to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A matching socket file appeared.
    Added { name: String, path: PathBuf },

    /// A matching socket file was deleted.
    Removed { name: String },
}

/// Extract the instance token from a socket filename, or `None` if the
/// filename does not match the pattern. The token must be non-empty,
/// contain no further `.` (the pattern would be ambiguous otherwise),
/// and fit the name bound.
pub fn instance_from_filename(filename: &str) -> Option<&str> {
    let token = filename
        .strip_prefix(SOCKET_PREFIX)?
        .strip_suffix(SOCKET_SUFFIX)?;
    if token.is_empty() || token.len() > INSTANCE_NAME_MAX || token.contains('.') {
        return None;
    }
    Some(token)
}

fn classify(event: &Event) -> Vec<DiscoveryEvent> {
    let mut out = Vec::new();
    for path in &event.paths {
        let Some(name) = path
            .file_name()
            .and_then(|f| f.to_str())
            .and_then(instance_from_filename)
        else {
            continue;
        };

        match event.kind {
            EventKind::Create(_) => out.push(DiscoveryEvent::Added {
                name: name.to_string(),
                path: path.clone(),
            }),
            EventKind::Remove(_) => out.push(DiscoveryEvent::Removed {
                name: name.to_string(),
            }),
            _ => {}
        }
    }
    out
}

/// Watches the socket directory and feeds [`DiscoveryEvent`]s to the
/// reactor. Dropping the watcher stops event delivery.
pub struct DiscoveryWatcher {
    _watcher: RecommendedWatcher,
}

impl DiscoveryWatcher {
    /// Start watching `dir` (non-recursive). Failure here is fatal to the
    /// daemon: without discovery it cannot do its job.
    pub fn new(
        dir: &Path,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DiscoveryEvent>), BridgeError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for discovery_event in classify(&event) {
                        // The receiver only closes on daemon shutdown.
                        let _ = tx.send(discovery_event);
                    }
                }
                Err(e) => warn!(error = %e, "socket directory watcher error"),
            }
        })
        .map_err(|source| BridgeError::WatcherInit {
            dir: dir.to_path_buf(),
            source,
        })?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| BridgeError::WatcherInit {
                dir: dir.to_path_buf(),
                source,
            })?;

        Ok((Self { _watcher: watcher }, rx))
    }
}

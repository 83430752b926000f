//! Fatal bridge errors.

use std::path::PathBuf;

use thiserror::Error;

/// Startup failures the daemon cannot recover from. Everything else is
/// logged and survived.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Could not bind the control socket apps talk to.
    #[error("failed to bind control socket '{addr}': {source}")]
    ControlBind {
        addr: String,
        source: std::io::Error,
    },

    /// Could not initialize the socket-directory watcher.
    #[error("failed to watch socket directory {dir:?}: {source}")]
    WatcherInit {
        dir: PathBuf,
        source: notify::Error,
    },
}

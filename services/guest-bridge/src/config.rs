//! Configuration for the bridge daemon.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

/// Bridge daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the hypervisor creates per-guest socket files in.
    pub socket_dir: PathBuf,

    /// Abstract-namespace address of the control socket apps talk to.
    pub control_addr: String,

    /// Fixed delay before retrying a refused guest connection.
    pub retry_delay: Duration,

    /// Maximum number of simultaneously connected guest instances.
    pub max_instances: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let socket_dir = std::env::var("GUESTLINK_SOCKET_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/libvirt/qemu"));

        let control_addr = std::env::var("GUESTLINK_CONTROL_ADDR")
            .unwrap_or_else(|_| "guestlink.bridge".to_string());

        let retry_delay_ms = std::env::var("GUESTLINK_RETRY_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);

        let max_instances = std::env::var("GUESTLINK_MAX_INSTANCES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1024);

        Ok(Self {
            socket_dir,
            control_addr,
            retry_delay: Duration::from_millis(retry_delay_ms),
            max_instances,
        })
    }
}

//! guestlink bridge daemon.
//!
//! Relays messages between management applications on a hypervisor host
//! and agents running inside guest VMs. Applications send datagrams to
//! the control socket; guests speak newline-delimited JSON over per-VM
//! stream sockets discovered from the hypervisor's socket directory.

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use guestlink_bridge::{Bridge, Config};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("GUESTLINK_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting guestlink bridge");

    let config = Config::from_env()?;
    info!(
        socket_dir = %config.socket_dir.display(),
        control_addr = %config.control_addr,
        retry_delay_ms = config.retry_delay.as_millis() as u64,
        max_instances = config.max_instances,
        "configuration loaded"
    );

    let mut bridge = match Bridge::new(config) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(error = %e, "bridge startup failed");
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        result = bridge.run() => {
            if let Err(e) = result {
                error!(error = %e, "bridge exited with error");
                std::process::exit(1);
            }
        }
    }

    info!("bridge shutdown complete");
    Ok(())
}

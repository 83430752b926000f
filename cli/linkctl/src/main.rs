//! linkctl - send and receive messages through the guestlink bridge.
//!
//! A debugging stand-in for a real management application: `send` pushes
//! one envelope at a guest instance and prints whatever comes back;
//! `listen` binds an application address and prints every datagram the
//! bridge delivers to it.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::time::timeout;

use guestlink_bridge::control::ControlSocket;
use guestlink_proto::PROTOCOL_VERSION;

#[derive(Parser)]
#[command(name = "linkctl", about = "Talk to guests through the guestlink bridge")]
struct Cli {
    /// Abstract-namespace address of the bridge control socket.
    #[arg(
        long,
        env = "GUESTLINK_CONTROL_ADDR",
        default_value = "guestlink.bridge",
        global = true
    )]
    control_addr: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send an envelope to a guest instance and print replies.
    Send {
        /// Target instance name.
        instance: String,

        /// JSON payload for the envelope's data field.
        data: String,

        /// Address guests should reply to. Defaults to this process's
        /// own address.
        #[arg(long)]
        reply_to: Option<String>,

        /// How long to wait for replies, in seconds. Zero sends and
        /// exits.
        #[arg(long, default_value_t = 2)]
        wait: u64,
    },

    /// Bind an application address and print incoming datagrams.
    Listen {
        /// Abstract-namespace address to bind.
        addr: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Send {
            instance,
            data,
            reply_to,
            wait,
        } => send(&cli.control_addr, &instance, &data, reply_to, wait).await,
        Command::Listen { addr } => listen(&addr).await,
    }
}

async fn send(
    control_addr: &str,
    instance: &str,
    data: &str,
    reply_to: Option<String>,
    wait: u64,
) -> Result<()> {
    let data: Value = serde_json::from_str(data).context("data is not valid JSON")?;

    let own_addr = format!("linkctl.{}", std::process::id());
    let socket = ControlSocket::bind(&own_addr)
        .with_context(|| format!("failed to bind '{own_addr}'"))?;
    let reply_to = reply_to.unwrap_or_else(|| own_addr.clone());

    let envelope = json!({
        "version": PROTOCOL_VERSION,
        "dest_addr": reply_to,
        "dest_instance": instance,
        "data": data,
    });
    socket
        .try_send_to(envelope.to_string().as_bytes(), control_addr)
        .with_context(|| format!("failed to send to bridge at '{control_addr}'"))?;

    if wait == 0 {
        return Ok(());
    }

    let mut buf = vec![0u8; 65536];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(wait);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _sender))) => {
                println!("{}", String::from_utf8_lossy(&buf[..len]));
            }
            Ok(Err(e)) => return Err(e).context("receive failed"),
            Err(_elapsed) => break,
        }
    }
    Ok(())
}

async fn listen(addr: &str) -> Result<()> {
    let socket =
        ControlSocket::bind(addr).with_context(|| format!("failed to bind '{addr}'"))?;
    eprintln!("listening on '{addr}'");

    let mut buf = vec![0u8; 65536];
    loop {
        let (len, sender) = socket.recv_from(&mut buf).await.context("receive failed")?;
        let sender = sender.unwrap_or_else(|| "<unnamed>".to_string());
        println!("[{sender}] {}", String::from_utf8_lossy(&buf[..len]));
    }
}

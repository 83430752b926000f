//! The event reactor.
//!
//! One task owns every table — instance registry, retry queue, the
//! per-connection reassembly state — and multiplexes the control socket,
//! the discovery channel, and every guest connection through a single
//! `select!`. Nothing here blocks: socket I/O is non-blocking and the
//! only wait is the select itself, bounded by the retry queue's earliest
//! deadline.
//!
//! Retries are drained at the top of every iteration, not only when the
//! sleep branch fires: a wake for I/O readiness can arrive with a retry
//! already due, and the sleep branch alone would not observe it.

use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt, StreamMap};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connect::{self, ConnectOutcome};
use crate::control::ControlSocket;
use crate::discovery::{DiscoveryEvent, DiscoveryWatcher};
use crate::error::BridgeError;
use crate::registry::{InstanceRegistry, RegistryError};
use crate::retry::{RetryQueue, RetryRequest};
use crate::router::{self, DropReason};

/// Bytes read from a guest connection per readiness event.
const READ_CHUNK_BYTES: usize = 8192;

/// Largest control-socket datagram accepted.
const MAX_DATAGRAM_BYTES: usize = 65536;

/// Byte-chunk stream over the read half of one guest connection.
///
/// Yields whatever a single non-blocking read returns. An empty chunk
/// marks end-of-stream (the peer hung up); the stream ends after it.
struct GuestChunks {
    read: OwnedReadHalf,
    done: bool,
}

impl GuestChunks {
    fn new(read: OwnedReadHalf) -> Self {
        Self { read, done: false }
    }
}

impl Stream for GuestChunks {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        let mut buf = [0u8; READ_CHUNK_BYTES];
        let mut read_buf = ReadBuf::new(&mut buf);
        match Pin::new(&mut self.read).poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) => {
                let chunk = Bytes::copy_from_slice(read_buf.filled());
                if chunk.is_empty() {
                    self.done = true;
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Err(e)) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
        }
    }
}

/// The daemon: all state, one owner, no locks.
pub struct Bridge {
    config: Config,
    control: ControlSocket,
    registry: InstanceRegistry,
    retries: RetryQueue,
    guests: StreamMap<usize, GuestChunks>,
    discovery_rx: tokio::sync::mpsc::UnboundedReceiver<DiscoveryEvent>,
    _watcher: DiscoveryWatcher,
}

impl Bridge {
    /// Bind the control socket and start watching the socket directory.
    /// Both failures are fatal; anything later is survivable.
    pub fn new(config: Config) -> Result<Self, BridgeError> {
        let control = ControlSocket::bind(&config.control_addr)?;
        let (watcher, discovery_rx) = DiscoveryWatcher::new(&config.socket_dir)?;

        Ok(Self {
            registry: InstanceRegistry::new(config.max_instances),
            retries: RetryQueue::new(),
            guests: StreamMap::new(),
            control,
            discovery_rx,
            _watcher: watcher,
            config,
        })
    }

    /// Number of currently connected instances.
    pub fn instance_count(&self) -> usize {
        self.registry.len()
    }

    /// Run the reactor until the surrounding task is cancelled.
    pub async fn run(&mut self) -> Result<(), BridgeError> {
        info!(
            dir = %self.config.socket_dir.display(),
            control_addr = self.control.local_addr(),
            "bridge running"
        );

        // Pick up instances that were already running before we started.
        // The watcher is live at this point, so nothing slips between the
        // scan and the first event.
        for (name, path) in connect::scan_existing(&self.config.socket_dir) {
            if self.registry.find_by_name(&name).is_none() {
                self.connect_instance(name, path).await;
            }
        }

        let mut datagram = vec![0u8; MAX_DATAGRAM_BYTES];
        loop {
            self.process_retries().await;
            let deadline = self.retries.peek_deadline();

            tokio::select! {
                () = retry_wait(deadline) => {}

                result = self.control.recv_from(&mut datagram) => match result {
                    Ok((len, sender)) => {
                        self.handle_control_datagram(&datagram[..len], sender.as_deref());
                    }
                    Err(e) => warn!(error = %e, "control socket receive failed"),
                },

                Some(event) = self.discovery_rx.recv() => {
                    self.handle_discovery(event).await;
                }

                Some((slot, item)) = self.guests.next() => {
                    self.handle_guest_read(slot, item);
                }
            }
        }
    }

    /// Retry every due connection attempt, oldest first.
    async fn process_retries(&mut self) {
        for request in self.retries.drain_ready(Instant::now()) {
            debug!(instance = %request.name, "retrying connection");
            match connect::attempt_connect(&request.path).await {
                ConnectOutcome::Connected(stream) => self.register(request.name, stream),
                ConnectOutcome::RetryLater => {
                    // Fixed delay from now, so consecutive refusals do not
                    // compound the interval.
                    self.retries.enqueue(RetryRequest {
                        next_attempt: Instant::now() + self.config.retry_delay,
                        ..request
                    });
                }
                ConnectOutcome::Failed(e) => {
                    warn!(instance = %request.name, error = %e, "giving up on connection");
                }
            }
        }
    }

    async fn handle_discovery(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Added { name, path } => {
                if self.registry.find_by_name(&name).is_some() {
                    debug!(instance = %name, "already connected");
                    return;
                }
                self.connect_instance(name, path).await;
            }
            DiscoveryEvent::Removed { name } => {
                // Deletion is authoritative even if the hang-up was
                // already seen; teardown is idempotent either way.
                if let Some(slot) = self.registry.find_by_name(&name).map(|i| i.slot) {
                    info!(instance = %name, "socket file deleted");
                    self.teardown(slot);
                }
            }
        }
    }

    async fn connect_instance(&mut self, name: String, path: PathBuf) {
        match connect::attempt_connect(&path).await {
            ConnectOutcome::Connected(stream) => self.register(name, stream),
            ConnectOutcome::RetryLater => self.retries.enqueue(RetryRequest {
                name,
                path,
                next_attempt: Instant::now() + self.config.retry_delay,
            }),
            ConnectOutcome::Failed(e) => {
                warn!(instance = %name, path = %path.display(), error = %e,
                      "connection attempt failed");
            }
        }
    }

    /// Hand a connected stream to the registry and the readiness table.
    /// Registry refusal drops the stream, which closes it.
    fn register(&mut self, name: String, stream: UnixStream) {
        let (read, write) = stream.into_split();
        match self.registry.insert(name.clone(), write) {
            Ok(slot) => {
                self.guests.insert(slot, GuestChunks::new(read));
                info!(instance = %name, slot, "guest connected");
            }
            Err(RegistryError::AlreadyExists { .. }) => {
                debug!(instance = %name, "already connected, dropping duplicate");
            }
            Err(e @ RegistryError::CapacityExceeded { .. }) => {
                warn!(instance = %name, error = %e, "refusing connection");
            }
        }
    }

    /// Release everything an instance holds: readiness slot, registry
    /// slot, both socket halves. Safe to call twice; the hang-up and
    /// file-deletion paths can both observe the same departure.
    fn teardown(&mut self, slot: usize) {
        self.guests.remove(&slot);
        if let Some(instance) = self.registry.remove(slot) {
            info!(instance = %instance.name, slot, "guest disconnected");
        }
    }

    fn handle_guest_read(&mut self, slot: usize, item: std::io::Result<Bytes>) {
        let chunk = match item {
            Ok(chunk) if chunk.is_empty() => {
                debug!(slot, "guest hung up");
                self.teardown(slot);
                return;
            }
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(slot, error = %e, "guest read failed");
                self.teardown(slot);
                return;
            }
        };

        let Some(instance) = self.registry.get_mut(slot) else {
            // Readiness fired for a slot torn down earlier in this
            // iteration; nothing to deliver to.
            self.guests.remove(&slot);
            return;
        };

        let frames = instance.framer.push(&chunk);
        let name = instance.name.clone();
        for frame in frames {
            if let Err(reason) = router::forward_guest_frame(&self.control, frame, &name) {
                warn!(instance = %name, %reason, "dropping guest message");
            }
        }
    }

    fn handle_control_datagram(&mut self, datagram: &[u8], sender: Option<&str>) {
        if let Err(reason) = router::forward_app_datagram(&mut self.registry, datagram, sender) {
            match reason {
                DropReason::UnknownInstance(_) => info!(%reason, "dropping app message"),
                _ => warn!(%reason, "dropping app message"),
            }
        }
    }
}

async fn retry_wait(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

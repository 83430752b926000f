//! Message routing between the control socket and guest connections.
//!
//! Both directions follow the same shape: validate the routing fields,
//! rebuild the envelope for the far side, forward in a single
//! non-blocking write. Anything invalid is dropped with a reason; the
//! sender never sees a protocol-level error from the bridge itself
//! (collaborators layer their own NACK convention on top when they want
//! one). Delivery is at-most-effort.

use std::io;

use serde_json::Value;
use thiserror::Error;

use guestlink_proto::{AppBound, AppEnvelope, EnvelopeError, GuestBound, GuestEnvelope};

use crate::control::ControlSocket;
use crate::registry::InstanceRegistry;

/// Why a message was dropped instead of forwarded. Logged, never
/// propagated to the peer.
#[derive(Debug, Error)]
pub enum DropReason {
    /// Missing field, ill-typed field, or version mismatch.
    #[error("invalid envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    /// `dest_instance` names nobody currently connected.
    #[error("no connected instance named '{0}'")]
    UnknownInstance(String),

    /// Datagram sender is not bound to an abstract-namespace address, so
    /// there is no address to put in `source_addr`.
    #[error("sender address not in the abstract namespace")]
    UnnamedSender,

    /// The forwarding write failed outright.
    #[error("send to '{dest}' failed: {source}")]
    SendFailed { dest: String, source: io::Error },

    /// The forwarding write was cut short. The connection stays up; the
    /// bridge does not retry application-level writes.
    #[error("short write to '{dest}': {written} of {len} bytes")]
    ShortWrite {
        dest: String,
        written: usize,
        len: usize,
    },
}

/// Forward one reassembled guest frame to the application it addresses.
///
/// The outbound envelope keeps the guest's `source_addr`, stamps the
/// originating instance name, and travels as a single datagram to the
/// abstract address named by `dest_addr`.
pub fn forward_guest_frame(
    control: &ControlSocket,
    frame: Value,
    instance_name: &str,
) -> Result<(), DropReason> {
    let env = GuestEnvelope::from_value(frame)?;
    let dest = env.dest_addr.clone();

    let bytes = AppBound::relabel(env, instance_name).to_bytes();
    let written = control
        .try_send_to(&bytes, &dest)
        .map_err(|source| DropReason::SendFailed {
            dest: dest.clone(),
            source,
        })?;

    if written != bytes.len() {
        return Err(DropReason::ShortWrite {
            dest,
            written,
            len: bytes.len(),
        });
    }
    Ok(())
}

/// Forward one control-socket datagram to the guest it addresses.
///
/// `sender` is the datagram's transport-level source address and becomes
/// the outbound `source_addr`, so the guest can reply without the
/// application naming itself inside the payload. The frame goes out as
/// one write: serialized envelope plus the delimiter byte.
pub fn forward_app_datagram(
    registry: &mut InstanceRegistry,
    datagram: &[u8],
    sender: Option<&str>,
) -> Result<(), DropReason> {
    let env = AppEnvelope::from_slice(datagram)?;
    let sender = sender.ok_or(DropReason::UnnamedSender)?;

    let dest_instance = env.dest_instance.clone();
    let slot = registry
        .find_by_name(&dest_instance)
        .map(|instance| instance.slot)
        .ok_or_else(|| DropReason::UnknownInstance(dest_instance.clone()))?;

    let bytes = GuestBound::relabel(env, sender).to_framed_bytes();
    let Some(instance) = registry.get_mut(slot) else {
        return Err(DropReason::UnknownInstance(dest_instance));
    };

    match instance.writer.try_write(&bytes) {
        Ok(written) if written == bytes.len() => Ok(()),
        Ok(written) => Err(DropReason::ShortWrite {
            dest: dest_instance,
            written,
            len: bytes.len(),
        }),
        Err(source) => Err(DropReason::SendFailed {
            dest: dest_instance,
            source,
        }),
    }
}

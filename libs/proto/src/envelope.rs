//! Envelope types for the two routing directions.
//!
//! The serialized key order of the outbound types is part of the wire
//! contract: existing host applications and guest agents compare whole
//! frames in their tests, so the structs below declare fields in exactly
//! the order they must appear on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol version carried in every envelope. Messages with any other
/// version are dropped.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frame separator on stream transports.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Envelope validation failure.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Missing or ill-typed field.
    #[error("invalid envelope: {0}")]
    Invalid(#[from] serde_json::Error),

    /// Version field present but not the current protocol version.
    #[error("version {got}, expected {PROTOCOL_VERSION}")]
    VersionMismatch { got: u32 },
}

fn check_version(got: u32) -> Result<(), EnvelopeError> {
    if got == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(EnvelopeError::VersionMismatch { got })
    }
}

/// Envelope received from a guest connection.
///
/// `dest_addr` names the host application the guest is talking to;
/// `source_addr` is the guest-side return address, passed through so the
/// application can reply.
#[derive(Debug, Clone, Deserialize)]
pub struct GuestEnvelope {
    pub version: u32,
    pub source_addr: String,
    pub dest_addr: String,
    pub data: Value,
}

impl GuestEnvelope {
    /// Validate a reassembled frame. Unknown keys are ignored.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let env: Self = serde_json::from_value(value)?;
        check_version(env.version)?;
        Ok(env)
    }
}

/// Envelope received from a host application datagram.
///
/// The sender's own address is not a field; the bridge takes it from the
/// datagram's transport source address.
#[derive(Debug, Clone, Deserialize)]
pub struct AppEnvelope {
    pub version: u32,
    pub dest_addr: String,
    pub dest_instance: String,
    pub data: Value,
}

impl AppEnvelope {
    /// Validate one control-socket datagram. Unknown keys are ignored,
    /// as is whitespace around the object.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let env: Self = serde_json::from_slice(bytes.trim_ascii())?;
        check_version(env.version)?;
        Ok(env)
    }
}

/// Envelope the bridge forwards to a host application.
#[derive(Debug, Clone, Serialize)]
pub struct AppBound {
    pub data: Value,
    pub version: u32,
    pub source_addr: String,
    pub source_instance: String,
}

impl AppBound {
    /// Relabel a guest envelope with the name of the instance it came from.
    pub fn relabel(env: GuestEnvelope, source_instance: &str) -> Self {
        Self {
            data: env.data,
            version: PROTOCOL_VERSION,
            source_addr: env.source_addr,
            source_instance: source_instance.to_string(),
        }
    }

    /// One datagram payload, no delimiter.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Envelope the bridge forwards to a guest connection.
#[derive(Debug, Clone, Serialize)]
pub struct GuestBound {
    pub data: Value,
    pub version: u32,
    pub dest_addr: String,
    pub source_addr: String,
}

impl GuestBound {
    /// Relabel an application envelope with the sender's transport address.
    pub fn relabel(env: AppEnvelope, source_addr: &str) -> Self {
        Self {
            data: env.data,
            version: PROTOCOL_VERSION,
            dest_addr: env.dest_addr,
            source_addr: source_addr.to_string(),
        }
    }

    /// One frame including the trailing delimiter, written to the guest
    /// stream as a single buffer.
    pub fn to_framed_bytes(&self) -> Vec<u8> {
        let mut buf = serde_json::to_vec(self).unwrap_or_default();
        buf.push(FRAME_DELIMITER);
        buf
    }
}

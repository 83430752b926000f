//! NACK reply convention.
//!
//! A collaborator that receives a malformed or semantically invalid
//! request answers with a `msg_type = "nack"` envelope payload carrying a
//! bounded human-readable description. The bridge routes NACKs like any
//! other message.

use serde::{Deserialize, Serialize};

use crate::envelope::PROTOCOL_VERSION;

/// `msg_type` discriminator for NACK replies.
pub const MSG_TYPE_NACK: &str = "nack";

/// Upper bound on `log_msg` length in bytes.
pub const NACK_LOG_MAX: usize = 500;

/// NACK payload, sent back to the original sender address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nack {
    pub version: u32,
    pub msg_type: String,
    pub log_msg: String,
}

impl Nack {
    /// Build a NACK, truncating `log_msg` to [`NACK_LOG_MAX`] bytes on a
    /// character boundary.
    pub fn new(log_msg: impl Into<String>) -> Self {
        let mut log_msg = log_msg.into();
        if log_msg.len() > NACK_LOG_MAX {
            let mut end = NACK_LOG_MAX;
            while !log_msg.is_char_boundary(end) {
                end -= 1;
            }
            log_msg.truncate(end);
        }
        Self {
            version: PROTOCOL_VERSION,
            msg_type: MSG_TYPE_NACK.to_string(),
            log_msg,
        }
    }
}

//! Wire format shared by the guestlink bridge and its collaborators.
//!
//! Every message crossing the bridge is a single JSON object ("envelope").
//! On a guest stream connection, envelopes are separated by one `\n` byte;
//! on the host control socket each datagram carries exactly one envelope
//! with no delimiter.
//!
//! The bridge itself only looks at the routing keys (`version`,
//! `source_addr`, `dest_addr`, `source_instance`, `dest_instance`) and
//! passes the nested `data` object through untouched. Collaborator
//! protocols (NACK replies, CPU scaling) layer their own keys on top.

pub mod envelope;
pub mod nack;
pub mod scale;

pub use envelope::{
    AppBound, AppEnvelope, EnvelopeError, GuestBound, GuestEnvelope, FRAME_DELIMITER,
    PROTOCOL_VERSION,
};
pub use nack::Nack;

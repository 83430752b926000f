//! Per-connection stream reassembly.
//!
//! Guest connections carry newline-delimited JSON. Reads are arbitrary
//! byte chunks: a single read may hold several frames, a frame may span
//! many reads, and guests have been observed to interleave garbage bytes
//! between frames. The framer turns chunks into complete JSON objects and
//! never lets a corrupt fragment poison a later frame.
//!
//! A delimiter always terminates a logical message: if the accumulated
//! bytes at a delimiter do not form a complete JSON object, that message
//! is dropped rather than recovered across the boundary.

use bytes::BytesMut;
use serde_json::Value;
use tracing::{debug, warn};

use guestlink_proto::FRAME_DELIMITER;

/// Frames larger than this are dropped and the accumulator reset.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Reassembly state for one guest connection.
#[derive(Debug, Default)]
pub struct StreamFramer {
    acc: BytesMut,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if bytes of an unterminated frame are buffered.
    pub fn is_mid_frame(&self) -> bool {
        !self.acc.is_empty()
    }

    /// Consume one chunk of newly read bytes, returning every complete
    /// frame it finishes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        let mut frames = Vec::new();
        if chunk.is_empty() {
            return frames;
        }

        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == FRAME_DELIMITER) {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            self.acc.extend_from_slice(head);
            if self.acc.is_empty() {
                // Leading or doubled delimiter.
                continue;
            }

            if let Some(frame) = first_object(&self.acc) {
                frames.push(frame);
            }
            self.acc.clear();
        }

        if !rest.is_empty() {
            self.acc.extend_from_slice(rest);
            if self.acc.len() > MAX_FRAME_BYTES {
                warn!(
                    buffered = self.acc.len(),
                    "dropping oversized unterminated frame"
                );
                self.acc.clear();
            }
        }

        frames
    }
}

/// Parse the first JSON value in `bytes`, tolerating leading whitespace
/// and ignoring anything after the value (the delimiter ended the
/// message; trailing bytes are part of the lost remainder). Non-object
/// values are garbage by the wire contract and are dropped here.
fn first_object(bytes: &[u8]) -> Option<Value> {
    let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value @ Value::Object(_))) => Some(value),
        Some(Ok(value)) => {
            debug!(%value, "dropping non-object frame");
            None
        }
        Some(Err(e)) => {
            debug!(error = %e, "dropping corrupt frame");
            None
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(name: &str, seq: u64, secret: u64) -> Value {
        json!({"name": name, "seq": seq, "data": {"secret": secret}})
    }

    fn feed(framer: &mut StreamFramer, chunks: &[&[u8]]) -> Vec<Value> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(framer.push(chunk));
        }
        out
    }

    #[test]
    fn test_one_message_per_read() {
        let mut framer = StreamFramer::new();
        let out = feed(
            &mut framer,
            &[
                b"\n{\"name\":\"guest0\",\"seq\":1,\"data\":{\"secret\":101}}\n",
                b"\n{\"name\":\"guest0\",\"seq\":2,\"data\":{\"secret\":102}}\n",
                b"\n{\"name\":\"guest0\",\"seq\":3,\"data\":{\"secret\":103}}\n",
            ],
        );
        assert_eq!(
            out,
            vec![
                frame("guest0", 1, 101),
                frame("guest0", 2, 102),
                frame("guest0", 3, 103)
            ]
        );
        assert!(!framer.is_mid_frame());
    }

    #[test]
    fn test_partial_messages_across_reads() {
        // An incomplete fragment terminated by a delimiter is dropped;
        // complete frames split across reads are reassembled.
        let mut framer = StreamFramer::new();
        let out = feed(
            &mut framer,
            &[
                b"\n{\"name\":\n{\"name\":\"guest0\",\"seq\":1,\"data\":{\"secret\":101}",
                b"}\n\n{\"name\":\"guest0\",\"seq\":2,\"data\":{\"secret\":102}}\n",
                b"\n{\"name\":\"guest0\",\"seq\":3,\"data\":{\"secret\":103}}\n",
            ],
        );
        assert_eq!(
            out,
            vec![
                frame("guest0", 1, 101),
                frame("guest0", 2, 102),
                frame("guest0", 3, 103)
            ]
        );
    }

    #[test]
    fn test_frame_split_at_every_read() {
        let mut framer = StreamFramer::new();
        let out = feed(
            &mut framer,
            &[
                b"\n",
                b"{\"name\":\"guest1\",\"seq\":1,\"data\":{\"secret\":201}}",
                b"\n\n{\"name\":\"guest1\",\"seq\":2,\"data\":{\"secret\":202}}\n\n{\"name\":\"guest1\",\"seq\":3,\"data\":{\"secret\":203}}\n",
            ],
        );
        assert_eq!(
            out,
            vec![
                frame("guest1", 1, 201),
                frame("guest1", 2, 202),
                frame("guest1", 3, 203)
            ]
        );
    }

    #[test]
    fn test_garbage_between_messages() {
        let mut framer = StreamFramer::new();
        let out = feed(
            &mut framer,
            &[
                b"\n{\"name\":\"guest0\",\"s",
                b"eq\":1,\"data\":{\"secret\":101}}\\nJHgB\x07b4\\sx34xbb\n{\"name\":\"guest0\",\"seq\":2,\"data\":{\"secret\":102}}\n7b4x34",
                b"\n{\"name\":\"guest0\",\"seq\":3,\"data\":{\"secret\":103}}\n",
            ],
        );
        assert_eq!(
            out,
            vec![
                frame("guest0", 1, 101),
                frame("guest0", 2, 102),
                frame("guest0", 3, 103)
            ]
        );
    }

    #[test]
    fn test_garbage_with_trailing_braces() {
        // A complete object followed by stray closing braces and spaces
        // before the delimiter: the object is kept, the tail discarded.
        let mut framer = StreamFramer::new();
        let out = feed(
            &mut framer,
            &[
                b"\n{\"name\":\"guest1\",\"seq\":1,\"data\":{\"secret\":201}}\n7x4\x0a}}{{\n{\"name\":",
                b"\"guest1\",\"seq\":2,\"data\":{\"secret\"",
                b":202}}}}           \n\n{\"name\":\"guest1\",\"seq\":3,\"data\":{\"secret\":203}}\n",
            ],
        );
        assert_eq!(
            out,
            vec![
                frame("guest1", 1, 201),
                frame("guest1", 2, 202),
                frame("guest1", 3, 203)
            ]
        );
    }

    #[test]
    fn test_multiple_messages_per_read() {
        let mut framer = StreamFramer::new();
        let out = feed(
            &mut framer,
            &[
                b"\n{\"name\":\"guest0\",\"seq\":1,\"data\":{\"secret\":101}}\n\n{\"name\":\"guest0\",\"seq\":2,\"data\":{\"secret\":102}}\n*^*&%^*{{%$\n{\"name\":\"guest0\",\"seq\":3,\"data\":{\"secret\":103}}\n",
                b"\n",
                b"\n{\"name\":\n",
            ],
        );
        assert_eq!(
            out,
            vec![
                frame("guest0", 1, 101),
                frame("guest0", 2, 102),
                frame("guest0", 3, 103)
            ]
        );
        assert!(!framer.is_mid_frame());
    }

    #[test]
    fn test_arbitrary_chunk_boundaries() {
        // The same frame sequence must survive any split, including
        // one-byte chunks and empty chunks.
        let frames = [
            frame("guest2", 1, 301),
            frame("guest2", 2, 302),
            frame("guest2", 3, 303),
        ];
        let mut wire = Vec::new();
        for f in &frames {
            wire.extend_from_slice(serde_json::to_string(f).unwrap().as_bytes());
            wire.push(b'\n');
        }

        for chunk_size in [1, 2, 3, 7, 16, wire.len()] {
            let mut framer = StreamFramer::new();
            let mut out = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                out.extend(framer.push(chunk));
                out.extend(framer.push(b""));
            }
            assert_eq!(out, frames, "chunk_size={chunk_size}");
            assert!(!framer.is_mid_frame());
        }
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut framer = StreamFramer::new();
        assert!(framer.push(b"").is_empty());
        assert!(!framer.is_mid_frame());

        framer.push(b"{\"partial\":");
        assert!(framer.push(b"").is_empty());
        assert!(framer.is_mid_frame());
    }

    #[test]
    fn test_garbage_never_corrupts_later_frame() {
        let mut framer = StreamFramer::new();
        let out = feed(
            &mut framer,
            &[
                b"\x00\xff\xfegarbage{{{\n",
                b"{\"version\":1,\"data\":{}}\n",
            ],
        );
        assert_eq!(out, vec![json!({"version": 1, "data": {}})]);
    }

    #[test]
    fn test_non_object_value_dropped() {
        let mut framer = StreamFramer::new();
        let out = feed(&mut framer, &[b"42\n[1,2]\n\"str\"\n{\"ok\":true}\n"]);
        assert_eq!(out, vec![json!({"ok": true})]);
    }

    #[test]
    fn test_oversized_frame_dropped() {
        let mut framer = StreamFramer::new();
        let big = vec![b'x'; MAX_FRAME_BYTES + 1];
        assert!(framer.push(&big).is_empty());
        // The oversized accumulator was discarded, so the next frame
        // parses cleanly.
        assert!(!framer.is_mid_frame());
        let out = framer.push(b"{\"ok\":1}\n");
        assert_eq!(out, vec![json!({"ok": 1})]);
    }
}

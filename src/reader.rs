//! Notification reader that reassembles device responses
//!
//! The device may split one response across several notifications. Fragments
//! are appended to a single buffer until it ends with the terminator; the
//! completed frame, minus its prefix and terminator, goes to the correlator.
//!
//! A partial frame is tagged with the correlator epoch it started under. If a
//! new command was armed since then, the leftover bytes belong to an earlier
//! command and are discarded before the new fragment is appended.

use bytes::BytesMut;
use std::sync::{Arc, Mutex, PoisonError};

use crate::correlator::{Correlator, Delivery};
use crate::protocol::TERMINATOR;

/// Largest partial frame kept while waiting for a terminator
const MAX_BUFFER: usize = 4096;

struct FrameBuffer {
    bytes: BytesMut,
    /// Correlator epoch the buffered partial frame started under
    epoch: u64,
}

/// Receives raw notifications and completes responses
pub struct NotificationReader {
    correlator: Arc<Correlator>,
    buffer: Mutex<FrameBuffer>,
    prefix_len: usize,
}

impl NotificationReader {
    /// Create a new reader feeding `correlator`
    ///
    /// `prefix_len` bytes of framing are dropped from the front of every
    /// completed frame.
    pub fn new(correlator: Arc<Correlator>, prefix_len: usize) -> Self {
        Self {
            correlator,
            buffer: Mutex::new(FrameBuffer {
                bytes: BytesMut::with_capacity(256),
                epoch: 0,
            }),
            prefix_len,
        }
    }

    /// Handle one inbound notification.
    ///
    /// Returns the delivery outcome when this fragment completed a frame, and
    /// `None` while the frame is still partial. Never blocks on the caller
    /// side of the correlator, so it is safe to call from a transport task or
    /// a foreign callback thread.
    pub fn handle_notification(&self, handle: u16, fragment: &[u8]) -> Option<Delivery> {
        tracing::trace!(
            "Notification from handle 0x{:02x}: {} bytes: {:02x?}",
            handle,
            fragment.len(),
            fragment
        );

        let frame = {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            let epoch = self.correlator.epoch();

            if buffer.bytes.is_empty() {
                buffer.epoch = epoch;
            } else if buffer.epoch != epoch {
                let leftover = buffer.bytes.split();
                tracing::warn!(
                    len = leftover.len(),
                    "Discarding partial frame left over from an earlier command"
                );
                self.correlator.discard(self.strip_prefix(&leftover));
                buffer.epoch = epoch;
            }

            buffer.bytes.extend_from_slice(fragment);

            if buffer.bytes.last() != Some(&TERMINATOR) {
                if buffer.bytes.len() > MAX_BUFFER {
                    tracing::warn!(
                        len = buffer.bytes.len(),
                        "Notification buffer overflow, resetting"
                    );
                    buffer.bytes.clear();
                }
                return None;
            }

            buffer.bytes.split().freeze()
        };

        let payload = self.strip_prefix(&frame[..frame.len() - 1]);
        Some(self.correlator.deliver(payload.to_vec()))
    }

    fn strip_prefix<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        &frame[self.prefix_len.min(frame.len())..]
    }

    /// Number of buffered bytes of an incomplete frame
    pub fn buffered(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .bytes
            .len()
    }

    /// Discard any partially received frame
    pub fn reset(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .bytes
            .clear();
    }
}

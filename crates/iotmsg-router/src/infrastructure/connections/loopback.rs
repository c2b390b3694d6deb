//! Loopback transport: outputs become inputs.

use iotmsg_core::{decode_message, encode_wire_text, BoundedQueue, Message};

use crate::application::connection::{Connection, ConnectionCore, ConnectionError};

/// Default number of lines a loopback holds before writes fail.
pub const DEFAULT_LOOPBACK_CAPACITY: usize = 64;

/// A connection whose writes are queued and read back by `poll_inputs`.
///
/// Both `output_message` and `send_queued_output` go through the wire codec
/// path, so a loopback exercises encoding and decoding exactly like a real
/// line-oriented transport.
pub struct LoopbackConnection {
    core: ConnectionCore,
    pending: BoundedQueue<String>,
}

impl LoopbackConnection {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let core = ConnectionCore::new(name);
        let pending = BoundedQueue::new(format!("{}-loopback", core.name()), capacity);
        Self { core, pending }
    }

    /// Feeds a raw line in as if it had arrived on the wire.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Transport`] if the loopback is full.
    pub fn inject(&mut self, line: impl Into<String>) -> Result<(), ConnectionError> {
        self.pending.push(line.into()).map_err(|full| ConnectionError::Transport {
            name: self.core.name().to_string(),
            reason: full.to_string(),
        })
    }

    /// Lines written but not yet read back.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Connection for LoopbackConnection {
    fn core(&self) -> &ConnectionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ConnectionCore {
        &mut self.core
    }

    fn poll_inputs(&mut self, max: usize) -> Vec<Message> {
        let n = max.min(self.pending.len());
        (0..n)
            .filter_map(|_| self.pending.pop())
            .map(|line| decode_message(&line))
            .collect()
    }

    fn output_message(&mut self, message: &Message) -> Result<(), ConnectionError> {
        let wire = encode_wire_text(message).map_err(|source| ConnectionError::Codec {
            name: self.core.name().to_string(),
            source,
        })?;
        self.inject(wire)
    }

    fn send_queued_output(&mut self, text: &str) -> Result<(), ConnectionError> {
        self.inject(text)
    }
}

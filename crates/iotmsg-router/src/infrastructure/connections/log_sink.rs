//! Log sink transport: writes every output line to the `tracing` log.

use iotmsg_core::{encode_wire_text, Message};
use tracing::info;

use crate::application::connection::{Connection, ConnectionCore, ConnectionError};

/// A write-only connection that logs each line at info level.
pub struct LogSinkConnection {
    core: ConnectionCore,
    lines_written: u64,
}

impl LogSinkConnection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: ConnectionCore::new(name),
            lines_written: 0,
        }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    fn write_line(&mut self, line: &str) {
        self.lines_written += 1;
        info!(target: "iotmsg::sink", connection = %self.core.name(), "{line}");
    }
}

impl Connection for LogSinkConnection {
    fn core(&self) -> &ConnectionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ConnectionCore {
        &mut self.core
    }

    fn poll_inputs(&mut self, _max: usize) -> Vec<Message> {
        Vec::new()
    }

    fn output_message(&mut self, message: &Message) -> Result<(), ConnectionError> {
        let wire = encode_wire_text(message).map_err(|source| ConnectionError::Codec {
            name: self.core.name().to_string(),
            source,
        })?;
        self.write_line(&wire);
        Ok(())
    }

    fn send_queued_output(&mut self, text: &str) -> Result<(), ConnectionError> {
        self.write_line(text);
        Ok(())
    }
}

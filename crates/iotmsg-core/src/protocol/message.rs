//! The in-memory message type exchanged between connections.
//!
//! A [`Message`] is a unit of text plus optional routing metadata (who sent
//! it, who it is for, where replies should go, and a free-form type tag).
//! Connections build one per inbound line, hand it to their route table by
//! reference, and drop it when dispatch finishes.
//!
//! # Wire text cache (for beginners)
//!
//! Encoding a message produces its *wire text*: the exact line that goes out
//! on a transport.  The encoded form is cached inside the message so a
//! connection can encode once and transmit several times, but the cache is
//! only valid until a field changes.  That is why every field is private and
//! every setter clears the cache: it is impossible to mutate a message and
//! accidentally transmit the stale encoding.

use serde::{Deserialize, Serialize};

/// Which of the two wire encodings a message uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    /// Raw text line; the routing fields are not transmitted.
    #[default]
    Plain,
    /// `[type=.. from=.. to=.. return=..] text`.
    Framed,
}

/// A framed unit of text with optional routing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    format: MessageFormat,
    message_type: String,
    from_path: String,
    to_path: String,
    return_path: String,
    text: String,
    /// Encoded form; `Some` only between `encode()` and the next mutation.
    pub(crate) wire_text: Option<String>,
}

impl Message {
    /// Creates an empty message with the given format.
    pub fn new(format: MessageFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// Creates a Plain-format message carrying `text`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use iotmsg_core::{Message, MessageFormat};
    ///
    /// let msg = Message::plain("hello world");
    /// assert_eq!(msg.format(), MessageFormat::Plain);
    /// assert_eq!(msg.text(), "hello world");
    /// ```
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::new(MessageFormat::Plain)
        }
    }

    /// Creates a Framed-format message carrying `text` and no routing fields.
    pub fn framed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::new(MessageFormat::Framed)
        }
    }

    /// Builder: sets the from-path.
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.set_from_path(from);
        self
    }

    /// Builder: sets the to-path.
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.set_to_path(to);
        self
    }

    /// Builder: sets the return-path.
    pub fn with_return(mut self, ret: impl Into<String>) -> Self {
        self.set_return_path(ret);
        self
    }

    /// Builder: sets the type tag.
    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.set_message_type(message_type);
        self
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn format(&self) -> MessageFormat {
        self.format
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn from_path(&self) -> &str {
        &self.from_path
    }

    pub fn to_path(&self) -> &str {
        &self.to_path
    }

    pub fn return_path(&self) -> &str {
        &self.return_path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the cached wire text, if the message has been encoded since
    /// its last mutation.
    pub fn wire_text(&self) -> Option<&str> {
        self.wire_text.as_deref()
    }

    // ── Mutators (each one invalidates the wire text) ─────────────────────────

    pub fn set_format(&mut self, format: MessageFormat) {
        self.format = format;
        self.wire_text = None;
    }

    pub fn set_message_type(&mut self, message_type: impl Into<String>) {
        self.message_type = message_type.into();
        self.wire_text = None;
    }

    pub fn set_from_path(&mut self, from: impl Into<String>) {
        self.from_path = from.into();
        self.wire_text = None;
    }

    pub fn set_to_path(&mut self, to: impl Into<String>) {
        self.to_path = to.into();
        self.wire_text = None;
    }

    pub fn set_return_path(&mut self, ret: impl Into<String>) {
        self.return_path = ret.into();
        self.wire_text = None;
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.wire_text = None;
    }

    /// Clears every field except the format.
    pub fn clear(&mut self) {
        *self = Self::new(self.format);
    }
}

//! Line codec for [`Message`]s.
//!
//! Two wire formats:
//! ```text
//! Plain:   <text>
//! Framed:  [type=<t> from=<f> to=<d> return=<r>] <text>
//! ```
//! Framed header keys are emitted in the fixed order `type, from, to, return`.
//! A key with an empty value is omitted, and `return` is also omitted when it
//! equals `from`.  On decode, keys are matched case-insensitively and unknown
//! keys are ignored.
//!
//! The codec keeps no state between calls: a route callback may decode or
//! encode further messages while an outer dispatch is still running.

use thiserror::Error;
use tracing::debug;

use crate::protocol::message::{Message, MessageFormat};

/// Maximum length in bytes of one encoded line.
pub const MAX_WIRE_TEXT_LEN: usize = 1024;

/// Errors that can occur while encoding a message.
///
/// Decoding never fails: malformed framed input degrades to plain text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The encoded line would exceed [`MAX_WIRE_TEXT_LEN`].
    #[error("wire text is {len} bytes, limit is {max}")]
    WireTextTooLong { len: usize, max: usize },

    /// A header value contains a character that would break the framing.
    #[error("header field `{field}` has value {value:?} which cannot be framed")]
    UnframeableValue { field: &'static str, value: String },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one received line into a [`Message`].
///
/// Leading and trailing whitespace is trimmed first.  A line starting with
/// `[` is parsed as Framed; anything else becomes a Plain message.  A framed
/// line with no closing `]` also becomes a Plain message holding the whole
/// trimmed line.
///
/// # Examples
///
/// ```rust
/// use iotmsg_core::{decode_message, MessageFormat};
///
/// let msg = decode_message("[from=dev1 to=dev2] turn on");
/// assert_eq!(msg.format(), MessageFormat::Framed);
/// assert_eq!(msg.from_path(), "dev1");
/// assert_eq!(msg.to_path(), "dev2");
/// assert_eq!(msg.text(), "turn on");
/// ```
pub fn decode_message(line: &str) -> Message {
    let trimmed = line.trim();

    if let Some(rest) = trimmed.strip_prefix('[') {
        if let Some(close) = rest.find(']') {
            return decode_framed(&rest[..close], rest[close + 1..].trim());
        }
        debug!("framed line without closing bracket, decoding as plain: {trimmed:?}");
    }

    Message::plain(trimmed)
}

/// Encodes `msg` into its wire text without touching the message's cache.
///
/// # Errors
///
/// Returns [`CodecError::UnframeableValue`] if a Framed header value contains
/// whitespace or `]`, and [`CodecError::WireTextTooLong`] if the line would be
/// longer than [`MAX_WIRE_TEXT_LEN`].
///
/// # Examples
///
/// ```rust
/// use iotmsg_core::{encode_wire_text, Message};
///
/// let msg = Message::framed("turn on").with_from("dev1").with_to("dev2");
/// assert_eq!(encode_wire_text(&msg).unwrap(), "[from=dev1 to=dev2] turn on");
/// ```
pub fn encode_wire_text(msg: &Message) -> Result<String, CodecError> {
    let wire = match msg.format() {
        MessageFormat::Plain => msg.text().to_string(),
        MessageFormat::Framed => encode_framed(msg)?,
    };

    if wire.len() > MAX_WIRE_TEXT_LEN {
        return Err(CodecError::WireTextTooLong {
            len: wire.len(),
            max: MAX_WIRE_TEXT_LEN,
        });
    }
    Ok(wire)
}

impl Message {
    /// Decodes a received line.  See [`decode_message`].
    pub fn decode(line: &str) -> Self {
        decode_message(line)
    }

    /// Encodes the message and caches the result as its wire text.
    ///
    /// On error nothing is cached and any previous wire text stays cleared.
    ///
    /// # Errors
    ///
    /// See [`encode_wire_text`].
    pub fn encode(&mut self) -> Result<&str, CodecError> {
        self.wire_text = None;
        let wire = encode_wire_text(self)?;
        Ok(self.wire_text.insert(wire).as_str())
    }
}

// ── Framed helpers ────────────────────────────────────────────────────────────

fn decode_framed(header: &str, text: &str) -> Message {
    let mut msg = Message::framed(text);

    for token in header.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            debug!("ignoring framed header token without '=': {token:?}");
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => msg.set_message_type(value),
            "from" => msg.set_from_path(value),
            "to" => msg.set_to_path(value),
            "return" => msg.set_return_path(value),
            other => debug!("ignoring unknown framed header key {other:?}"),
        }
    }

    msg
}

fn encode_framed(msg: &Message) -> Result<String, CodecError> {
    let mut fields: Vec<(&'static str, &str)> = Vec::with_capacity(4);
    fields.push(("type", msg.message_type()));
    fields.push(("from", msg.from_path()));
    fields.push(("to", msg.to_path()));
    if msg.return_path() != msg.from_path() {
        fields.push(("return", msg.return_path()));
    }

    let mut out = String::with_capacity(msg.text().len() + 32);
    out.push('[');
    let mut first = true;
    for (key, value) in fields {
        if value.is_empty() {
            continue;
        }
        if value.contains(|c: char| c.is_whitespace() || c == ']') {
            return Err(CodecError::UnframeableValue {
                field: key,
                value: value.to_string(),
            });
        }
        if !first {
            out.push(' ');
        }
        first = false;
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out.push(']');

    if !msg.text().is_empty() {
        out.push(' ');
        out.push_str(msg.text());
    }
    Ok(out)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

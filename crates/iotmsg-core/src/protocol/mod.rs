//! Protocol module containing the message type and the line codec.

pub mod codec;
pub mod message;

pub use codec::{decode_message, encode_wire_text, CodecError, MAX_WIRE_TEXT_LEN};
pub use message::{Message, MessageFormat};

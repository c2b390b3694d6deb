//! # iotmsg-core
//!
//! Shared library for the iotmsg router containing the line codec for
//! [`Message`]s, the filter predicates routes use to select messages, and the
//! bounded FIFO queue that provides backpressure between producers and
//! consumers.
//!
//! It has zero dependencies on OS APIs, threads, or transports.
//!
//! # Architecture overview (for beginners)
//!
//! iotmsg connects endpoints that speak very different transports (serial
//! lines, sockets, pipes, log sinks) by agreeing on one thing: every endpoint
//! exchanges *lines of text*.  A line is either plain text or carries a small
//! bracketed header with routing metadata.
//!
//! - **`protocol`** – How a line becomes a [`Message`] and back.  Two
//!   formats: Plain (`hello world`) and Framed (`[from=dev1 to=dev2] turn on`).
//!
//! - **`filter`** – Per-field predicates (`equals`, `starts_with`, `in`, …)
//!   grouped into a six-slot [`FilterSet`].  The router's routes use these to
//!   decide which messages they accept.
//!
//! - **`queue`** – [`BoundedQueue`], a fixed-capacity FIFO that fails instead
//!   of blocking when full.

pub mod filter;
pub mod protocol;
pub mod queue;

// Re-export the most-used types at the crate root so callers can write
// `iotmsg_core::Message` instead of `iotmsg_core::protocol::message::Message`.
pub use filter::{CompareOp, FilterItem, FilterSet, FilterSlot};
pub use protocol::codec::{decode_message, encode_wire_text, CodecError, MAX_WIRE_TEXT_LEN};
pub use protocol::message::{Message, MessageFormat};
pub use queue::{BoundedQueue, QueueFull};

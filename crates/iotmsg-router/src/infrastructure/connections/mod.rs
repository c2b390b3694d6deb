//! In-process reference connections.
//!
//! Real deployments plug serial ports, sockets or pipes in behind the
//! [`Connection`](crate::application::connection::Connection) trait.  The two
//! transports here need no hardware, which makes them useful for demos,
//! smoke tests and as templates for new transports:
//!
//! - **`loopback`** – every line written to it is read back as input.
//! - **`log_sink`** – every line written to it goes to the log; it never
//!   produces input.

pub mod log_sink;
pub mod loopback;

pub use log_sink::LogSinkConnection;
pub use loopback::LoopbackConnection;

//! Application layer of the router.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the pure
//! building blocks (the codec, filters and queue in `iotmsg_core`) and the
//! infrastructure (concrete transports, configuration files, stdin).
//!
//! Code in this layer:
//!
//! - **Orchestrates** core types to fulfil a goal (e.g., "deliver every line
//!   received on `serial0` to the routes that accept it").
//! - **Depends on abstractions** ([`connection::Connection`],
//!   [`route::MessageSink`], [`connection::NameRegistry`]) rather than
//!   concrete transports, so tests can plug in recording doubles.
//! - **Contains no OS calls, no network I/O, no file system access**.
//!
//! # Sub-modules
//!
//! - **`route`** – Named, filtered subscriptions on a connection and the
//!   ordered [`route::RouteTable`] that dispatches inbound messages.
//!
//! - **`connection`** – The contract every transport endpoint fulfils and the
//!   name registry used to find endpoints at runtime.
//!
//! - **`bridge`** – Couples two connections by installing forwarding routes.
//!
//! - **`outbound`** – The shared outbound text queue with its bounded retry.
//!
//! - **`connection_manager`** – The poll scheduler and the administrative
//!   command surface.  This runs on every tick, so it is the hot path.

pub mod bridge;
pub mod connection;
pub mod connection_manager;
pub mod outbound;
pub mod route;

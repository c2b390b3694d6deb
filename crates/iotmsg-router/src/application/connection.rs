//! The connection contract and the registry that resolves connections by name.
//!
//! A *connection* is one transport endpoint: a serial port, a TCP socket, a
//! pipe, a log file.  The router never touches bytes itself; every transport
//! implements [`Connection`] and hands the router decoded [`Message`]s.
//!
//! # Ownership (for beginners)
//!
//! Connections are shared as [`SharedConnection`] (`Arc<Mutex<dyn Connection>>`):
//!
//! - the [`ConnectionRegistry`] keeps one `Arc` per connection, in the order
//!   they were registered;
//! - bridges and sinks never keep an `Arc` of their own.  They store the
//!   connection's *name* and look it up through [`NameRegistry`] every time
//!   they need it, so nothing outlives the registry by accident.
//!
//! Locks on a connection are always short: lock, call one method, unlock.
//! No code path holds two connection locks at once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use iotmsg_core::{CodecError, Message};
use thiserror::Error;
use tracing::info;

use crate::application::route::RouteTable;

/// Error type for transport operations on a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection '{0}' is inactive")]
    Inactive(String),

    #[error("cannot encode output for '{name}': {source}")]
    Codec {
        name: String,
        #[source]
        source: CodecError,
    },

    #[error("transport error on '{name}': {reason}")]
    Transport { name: String, reason: String },
}

/// Error type for registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection name must not be empty")]
    EmptyName,
    #[error("a connection named '{0}' is already registered")]
    Duplicate(String),
}

// ── Connection state shared by every transport ────────────────────────────────

/// Traffic counters maintained by the connection manager and bridges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCounters {
    /// Inbound messages produced by `poll_inputs`.
    pub received: u64,
    /// Outbound messages and lines accepted by the transport.
    pub transmitted: u64,
    /// Outbound items discarded because the connection was inactive or failed.
    pub dropped: u64,
}

/// The state every connection carries regardless of its transport.
#[derive(Debug, Clone)]
pub struct ConnectionCore {
    name: String,
    active: bool,
    routes: RouteTable,
    pub counters: ConnectionCounters,
}

impl ConnectionCore {
    /// Creates an active core with an empty route table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            routes: RouteTable::new(),
            counters: ConnectionCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// ── Connection contract ───────────────────────────────────────────────────────

/// One transport endpoint.
///
/// Implementors provide access to their [`ConnectionCore`] plus the four
/// transport operations; the name, active flag and route accessors come for
/// free.
pub trait Connection: Send {
    fn core(&self) -> &ConnectionCore;
    fn core_mut(&mut self) -> &mut ConnectionCore;

    /// Returns up to `max` decoded inbound messages, oldest first.
    fn poll_inputs(&mut self, max: usize) -> Vec<Message>;

    /// Gives the transport a chance to flush up to `max` pending writes.
    ///
    /// Returns the number of writes completed.  Transports that write
    /// synchronously keep the default.
    fn poll_outputs(&mut self, _max: usize) -> Result<usize, ConnectionError> {
        Ok(0)
    }

    /// Sends a structured message; the transport chooses how to encode it.
    fn output_message(&mut self, message: &Message) -> Result<(), ConnectionError>;

    /// Sends one line of already-encoded text taken from the outbound queue.
    fn send_queued_output(&mut self, text: &str) -> Result<(), ConnectionError>;

    fn name(&self) -> &str {
        &self.core().name
    }

    fn is_active(&self) -> bool {
        self.core().active
    }

    fn set_active(&mut self, active: bool) {
        self.core_mut().active = active;
    }

    fn routes(&self) -> &RouteTable {
        &self.core().routes
    }

    fn routes_mut(&mut self) -> &mut RouteTable {
        &mut self.core_mut().routes
    }

    fn counters(&self) -> ConnectionCounters {
        self.core().counters
    }
}

/// A connection shared between the registry, the manager and route sinks.
pub type SharedConnection = Arc<Mutex<dyn Connection>>;

/// Wraps a concrete connection for registration.
pub fn share<C: Connection + 'static>(connection: C) -> SharedConnection {
    Arc::new(Mutex::new(connection))
}

/// Locks a shared connection.
///
/// A panic inside a transport poisons its mutex; the router keeps using the
/// connection anyway because its state is only counters and routes.
pub fn lock_connection(connection: &SharedConnection) -> MutexGuard<'_, dyn Connection + 'static> {
    connection.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Name registry ─────────────────────────────────────────────────────────────

/// Resolves configured names to live connections.
pub trait NameRegistry: Send + Sync {
    fn lookup_by_name(&self, name: &str) -> Option<SharedConnection>;
}

/// Registration-ordered set of connections with case-insensitive names.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<Vec<(String, SharedConnection)>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EmptyName`] for a nameless connection and
    /// [`RegistryError::Duplicate`] if the name (ignoring ASCII case) is taken.
    pub fn register(&self, connection: SharedConnection) -> Result<(), RegistryError> {
        let name = lock_connection(&connection).name().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            return Err(RegistryError::Duplicate(name));
        }
        info!("registered connection '{name}'");
        entries.push((name, connection));
        Ok(())
    }

    /// Snapshot of every connection in registration order.
    pub fn all(&self) -> Vec<SharedConnection> {
        self.read().iter().map(|(_, c)| Arc::clone(c)).collect()
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<(String, SharedConnection)>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NameRegistry for ConnectionRegistry {
    fn lookup_by_name(&self, name: &str) -> Option<SharedConnection> {
        self.read()
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, c)| Arc::clone(c))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal connection that records what it was asked to send.
    struct RecordingConnection {
        core: ConnectionCore,
        sent: Vec<String>,
    }

    impl RecordingConnection {
        fn new(name: &str) -> Self {
            Self {
                core: ConnectionCore::new(name),
                sent: Vec::new(),
            }
        }
    }

    impl Connection for RecordingConnection {
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
            self.sent.push(message.text().to_string());
            Ok(())
        }
        fn send_queued_output(&mut self, text: &str) -> Result<(), ConnectionError> {
            self.sent.push(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_new_connection_is_active_with_no_routes() {
        let conn = RecordingConnection::new("dev1");
        assert!(conn.is_active());
        assert!(conn.routes().is_empty());
        assert_eq!(conn.counters(), ConnectionCounters::default());
    }

    #[test]
    fn test_set_active_toggles_flag() {
        let mut conn = RecordingConnection::new("dev1");
        conn.set_active(false);
        assert!(!conn.is_active());
    }

    #[test]
    fn test_default_poll_outputs_reports_nothing_flushed() {
        let mut conn = RecordingConnection::new("dev1");
        assert_eq!(conn.poll_outputs(8).expect("poll_outputs"), 0);
    }

    #[test]
    fn test_registry_lookup_ignores_ascii_case() {
        // Arrange
        let registry = ConnectionRegistry::new();
        registry
            .register(share(RecordingConnection::new("Serial0")))
            .expect("register");

        // Act
        let found = registry.lookup_by_name("SERIAL0").expect("must resolve");

        // Assert
        assert_eq!(lock_connection(&found).name(), "Serial0");
        assert!(registry.lookup_by_name("serial1").is_none());
    }

    #[test]
    fn test_registry_rejects_duplicate_names() {
        let registry = ConnectionRegistry::new();
        registry
            .register(share(RecordingConnection::new("dev1")))
            .expect("first");

        let err = registry
            .register(share(RecordingConnection::new("DEV1")))
            .expect_err("duplicate must fail");

        assert_eq!(err, RegistryError::Duplicate("DEV1".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_rejects_empty_name() {
        let registry = ConnectionRegistry::new();
        let err = registry
            .register(share(RecordingConnection::new("")))
            .expect_err("empty name must fail");
        assert_eq!(err, RegistryError::EmptyName);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_preserves_registration_order() {
        let registry = ConnectionRegistry::new();
        for name in ["c", "a", "b"] {
            registry
                .register(share(RecordingConnection::new(name)))
                .expect("register");
        }
        assert_eq!(registry.names(), vec!["c", "a", "b"]);
        let polled: Vec<String> = registry
            .all()
            .iter()
            .map(|c| lock_connection(c).name().to_string())
            .collect();
        assert_eq!(polled, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_output_and_queued_text_reach_transport() {
        let mut conn = RecordingConnection::new("dev1");
        conn.output_message(&Message::plain("hello")).expect("output");
        conn.send_queued_output("raw line").expect("send");
        assert_eq!(conn.sent, vec!["hello", "raw line"]);
    }
}

//! Builds a running router from an [`AppConfig`].
//!
//! [`AppState::from_config`] is the single place where configuration turns
//! into live objects:
//!
//! ```text
//! AppConfig
//!  ├─ connections ──► LoopbackConnection / LogSinkConnection ──► registry
//!  ├─ routes      ──► ConfiguredRoutePolicy ──► each connection's RouteTable
//!  │                  (also the RESET hook)
//!  └─ bridges     ──► Bridge (activated if `active = true`) ──► manager
//! ```
//!
//! Route buffers are created once per declared route and shared between the
//! route table and whoever reads them, so `RESET` re-installs routes without
//! orphaning a consumer's buffer handle.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::application::bridge::{Bridge, BridgeError};
use crate::application::connection::{
    lock_connection, share, ConnectionRegistry, NameRegistry, RegistryError, SharedConnection,
};
use crate::application::connection_manager::{ConnectionManager, DefaultRoutePolicy};
use crate::application::outbound::{OutboundQueue, QueueSink};
use crate::application::route::{Route, RouteBuffer};
use crate::infrastructure::connections::{LogSinkConnection, LoopbackConnection};
use crate::infrastructure::storage::config::{
    AppConfig, ConnectionEntry, ConnectionKind, RouteEntry,
};

/// Error type for turning configuration into a router.
#[derive(Debug, Error)]
pub enum WiringError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("route '{route}' on '{connection}' forwards to unknown connection '{target}'")]
    UnknownForwardTarget {
        connection: String,
        route: String,
        target: String,
    },

    #[error("bridge '{0}' is declared twice")]
    DuplicateBridge(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

// ── Default-route policy ──────────────────────────────────────────────────────

/// [`DefaultRoutePolicy`] backed by the route declarations in the config file.
pub struct ConfiguredRoutePolicy {
    /// Lower-cased connection name → its declared routes.
    routes: HashMap<String, Vec<RouteEntry>>,
    /// (connection, route), both lower-cased → shared buffer.
    buffers: HashMap<(String, String), RouteBuffer>,
    outbound: OutboundQueue,
}

impl ConfiguredRoutePolicy {
    pub fn new(connections: &[ConnectionEntry], outbound: OutboundQueue) -> Self {
        let mut routes = HashMap::new();
        let mut buffers = HashMap::new();
        for conn in connections {
            let key = conn.name.to_ascii_lowercase();
            for entry in &conn.routes {
                if let Some(capacity) = entry.buffer_capacity {
                    let label = format!("{}/{}", conn.name, entry.name);
                    buffers.insert(
                        (key.clone(), entry.name.to_ascii_lowercase()),
                        RouteBuffer::new(label, capacity),
                    );
                }
            }
            routes.insert(key, conn.routes.clone());
        }
        Self {
            routes,
            buffers,
            outbound,
        }
    }

    /// The buffer behind a declared route, if it has one.
    pub fn buffer(&self, connection: &str, route: &str) -> Option<RouteBuffer> {
        self.buffers
            .get(&(connection.to_ascii_lowercase(), route.to_ascii_lowercase()))
            .cloned()
    }

    fn build_route(&self, connection: &str, entry: &RouteEntry) -> Route {
        let mut route = Route::new(entry.name.clone(), entry.filter.clone())
            .with_kind(entry.kind)
            .with_always_use(entry.always_use)
            .with_stop_if_handled(entry.stop_if_handled);
        if let Some(buffer) = self.buffer(connection, &entry.name) {
            route = route.with_buffer(buffer);
        }
        if let Some(target) = &entry.forward_to {
            let sink = QueueSink::new(self.outbound.clone(), target.clone());
            route = route.with_sink(Arc::new(sink));
        }
        route
    }
}

impl DefaultRoutePolicy for ConfiguredRoutePolicy {
    fn default_routes(&self, connection: &str) -> Vec<Route> {
        self.routes
            .get(&connection.to_ascii_lowercase())
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| self.build_route(connection, e))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ── AppState ──────────────────────────────────────────────────────────────────

/// Everything the binary needs to run the router.
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    pub policy: Arc<ConfiguredRoutePolicy>,
    pub config: AppConfig,
}

impl AppState {
    /// Creates, registers and wires every configured object.
    ///
    /// # Errors
    ///
    /// Any [`WiringError`]: duplicate names, a `forward_to` naming an unknown
    /// connection, or a bridge that cannot be activated.
    pub fn from_config(config: AppConfig) -> Result<Self, WiringError> {
        let registry = Arc::new(ConnectionRegistry::new());
        let outbound = OutboundQueue::new(
            config.router.outbound_capacity,
            config.router.retry_policy(),
        );
        let policy = Arc::new(ConfiguredRoutePolicy::new(
            &config.connections,
            outbound.clone(),
        ));

        for entry in &config.connections {
            registry.register(build_connection(entry))?;
        }
        check_forward_targets(&config, registry.as_ref())?;

        for entry in &config.connections {
            if let Some(connection) = registry.lookup_by_name(&entry.name) {
                let mut conn = lock_connection(&connection);
                for route in policy.default_routes(&entry.name) {
                    conn.routes_mut().push(route);
                }
            }
        }

        let manager = ConnectionManager::new(
            Arc::clone(&registry),
            outbound,
            config.router.manager_settings(),
        )
        .with_route_policy(Arc::clone(&policy) as Arc<dyn DefaultRoutePolicy>);

        let mut bridge_names: Vec<&str> = Vec::new();
        for entry in &config.bridges {
            if bridge_names.iter().any(|n| n.eq_ignore_ascii_case(&entry.name)) {
                return Err(WiringError::DuplicateBridge(entry.name.clone()));
            }
            bridge_names.push(&entry.name);

            let mut bridge = Bridge::new(
                entry.name.clone(),
                entry.object1.clone(),
                entry.object2.clone(),
                entry.direction,
                Arc::clone(&registry) as Arc<dyn NameRegistry>,
            );
            if entry.active {
                bridge.activate()?;
            }
            manager.add_bridge(bridge);
        }

        info!(
            "router wired: {} connection(s), {} bridge(s)",
            registry.len(),
            config.bridges.len()
        );
        Ok(Self {
            manager: Arc::new(manager),
            policy,
            config,
        })
    }

    /// Shared buffer of a configured route; see [`ConfiguredRoutePolicy::buffer`].
    pub fn route_buffer(&self, connection: &str, route: &str) -> Option<RouteBuffer> {
        self.policy.buffer(connection, route)
    }
}

fn build_connection(entry: &ConnectionEntry) -> SharedConnection {
    let connection = match entry.kind {
        ConnectionKind::Loopback => {
            share(LoopbackConnection::new(entry.name.clone(), entry.capacity))
        }
        ConnectionKind::LogSink => share(LogSinkConnection::new(entry.name.clone())),
    };
    lock_connection(&connection).set_active(entry.active);
    connection
}

fn check_forward_targets(
    config: &AppConfig,
    registry: &dyn NameRegistry,
) -> Result<(), WiringError> {
    for conn in &config.connections {
        for route in &conn.routes {
            if let Some(target) = &route.forward_to {
                if registry.lookup_by_name(target).is_none() {
                    return Err(WiringError::UnknownForwardTarget {
                        connection: conn.name.clone(),
                        route: route.name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bridge::BridgeDirection;
    use crate::application::connection_manager::AdminOutcome;
    use crate::infrastructure::storage::config::BridgeEntry;
    use iotmsg_core::{CompareOp, FilterItem, FilterSet, FilterSlot};

    fn route(name: &str) -> RouteEntry {
        RouteEntry {
            name: name.to_string(),
            kind: Default::default(),
            always_use: false,
            stop_if_handled: false,
            buffer_capacity: None,
            forward_to: None,
            filter: FilterSet::new(),
        }
    }

    fn connection(name: &str, kind: ConnectionKind, routes: Vec<RouteEntry>) -> ConnectionEntry {
        ConnectionEntry {
            name: name.to_string(),
            kind,
            active: true,
            capacity: 16,
            routes,
        }
    }

    fn config_with(connections: Vec<ConnectionEntry>, bridges: Vec<BridgeEntry>) -> AppConfig {
        let mut config = AppConfig {
            connections,
            bridges,
            ..AppConfig::default()
        };
        config.router.push_attempts = 1;
        config.router.push_retry_ms = 0;
        config
    }

    fn lights_route() -> RouteEntry {
        let mut entry = route("lights");
        entry.buffer_capacity = Some(4);
        entry.filter = FilterSet::new().with(
            FilterSlot::Text,
            FilterItem::new(CompareOp::StartsWith, "light", false),
        );
        entry
    }

    #[test]
    fn test_from_config_registers_every_connection() {
        // Arrange
        let config = config_with(
            vec![
                connection("loop", ConnectionKind::Loopback, vec![]),
                connection("console", ConnectionKind::LogSink, vec![]),
            ],
            vec![],
        );

        // Act
        let state = AppState::from_config(config).expect("wiring");

        // Assert
        assert_eq!(state.manager.registry().names(), vec!["loop", "console"]);
    }

    #[test]
    fn test_inactive_entry_starts_inactive() {
        let mut entry = connection("loop", ConnectionKind::Loopback, vec![]);
        entry.active = false;

        let state = AppState::from_config(config_with(vec![entry], vec![])).expect("wiring");

        let conn = state.manager.registry().lookup_by_name("loop").expect("registered");
        assert!(!lock_connection(&conn).is_active());
    }

    #[test]
    fn test_duplicate_connection_names_are_rejected() {
        let config = config_with(
            vec![
                connection("loop", ConnectionKind::Loopback, vec![]),
                connection("LOOP", ConnectionKind::LogSink, vec![]),
            ],
            vec![],
        );

        let err = AppState::from_config(config).err().expect("duplicate");

        assert!(matches!(err, WiringError::Registry(RegistryError::Duplicate(_))));
    }

    #[test]
    fn test_forward_to_unknown_connection_is_rejected() {
        let mut forward = route("fwd");
        forward.forward_to = Some("nowhere".to_string());
        let config = config_with(
            vec![connection("loop", ConnectionKind::Loopback, vec![forward])],
            vec![],
        );

        let err = AppState::from_config(config).err().expect("unknown target");

        assert!(matches!(
            err,
            WiringError::UnknownForwardTarget { ref target, .. } if target == "nowhere"
        ));
    }

    #[test]
    fn test_configured_routes_buffer_matching_input() {
        // Arrange
        let config = config_with(
            vec![connection("loop", ConnectionKind::Loopback, vec![lights_route()])],
            vec![],
        );
        let state = AppState::from_config(config).expect("wiring");
        state.manager.queue_output("loop", "light on").expect("queue");
        state.manager.queue_output("loop", "door open").expect("queue");

        // Act: first tick drains into the loopback, second tick reads it back.
        state.manager.poll().expect("tick 1");
        state.manager.poll().expect("tick 2");

        // Assert
        let buffer = state.route_buffer("LOOP", "Lights").expect("buffer");
        let buffered = buffer.drain();
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].source, "loop");
    }

    #[test]
    fn test_reset_reuses_the_same_buffer() {
        let config = config_with(
            vec![connection("loop", ConnectionKind::Loopback, vec![lights_route()])],
            vec![],
        );
        let state = AppState::from_config(config).expect("wiring");
        let before = state.route_buffer("loop", "lights").expect("buffer");

        let outcome = state.manager.interact("loop RESET").expect("reset");
        state.manager.queue_output("loop", "light off").expect("queue");
        state.manager.poll();
        state.manager.poll();

        assert_eq!(outcome, AdminOutcome::RoutesReset(1));
        assert_eq!(before.len(), 1);
    }

    #[test]
    fn test_forward_to_queues_output_for_target() {
        // Arrange: everything arriving on "loop" is forwarded to "console".
        let mut forward = route("to-console");
        forward.always_use = true;
        forward.forward_to = Some("console".to_string());
        let config = config_with(
            vec![
                connection("loop", ConnectionKind::Loopback, vec![forward]),
                connection("console", ConnectionKind::LogSink, vec![]),
            ],
            vec![],
        );
        let state = AppState::from_config(config).expect("wiring");
        state.manager.queue_output("loop", "hello").expect("queue");

        // Act
        state.manager.poll();
        let report = state.manager.poll().expect("tick 2");

        // Assert: forwarded during the connection pass, sent during the drain.
        assert_eq!(report.dispatch.forwarded, 1);
        assert_eq!(report.drained, 1);
        let console = state.manager.registry().lookup_by_name("console").expect("registered");
        assert_eq!(lock_connection(&console).counters().transmitted, 1);
    }

    #[test]
    fn test_active_bridge_entry_is_activated_at_startup() {
        let config = config_with(
            vec![
                connection("a", ConnectionKind::Loopback, vec![]),
                connection("b", ConnectionKind::Loopback, vec![]),
            ],
            vec![BridgeEntry {
                name: "ab".to_string(),
                object1: "a".to_string(),
                object2: "b".to_string(),
                direction: BridgeDirection::Bidirectional,
                active: true,
            }],
        );

        let state = AppState::from_config(config).expect("wiring");

        assert_eq!(state.manager.with_bridge("ab", |b| b.is_active()), Some(true));
    }

    #[test]
    fn test_bridge_to_unknown_connection_fails_when_active() {
        let config = config_with(
            vec![connection("a", ConnectionKind::Loopback, vec![])],
            vec![BridgeEntry {
                name: "ab".to_string(),
                object1: "a".to_string(),
                object2: "ghost".to_string(),
                direction: BridgeDirection::Bidirectional,
                active: true,
            }],
        );

        let err = AppState::from_config(config).err().expect("unknown endpoint");

        assert!(matches!(err, WiringError::Bridge(BridgeError::UnknownEndpoint { .. })));
    }

    #[test]
    fn test_duplicate_bridge_names_are_rejected() {
        let bridge = BridgeEntry {
            name: "ab".to_string(),
            object1: "a".to_string(),
            object2: "b".to_string(),
            direction: BridgeDirection::Bidirectional,
            active: false,
        };
        let config = config_with(
            vec![
                connection("a", ConnectionKind::Loopback, vec![]),
                connection("b", ConnectionKind::Loopback, vec![]),
            ],
            vec![bridge.clone(), bridge],
        );

        let err = AppState::from_config(config).err().expect("duplicate bridge");

        assert!(matches!(err, WiringError::DuplicateBridge(_)));
    }
}

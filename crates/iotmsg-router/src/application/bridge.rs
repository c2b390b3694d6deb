//! Bridges: couple two connections by installing forwarding routes.
//!
//! A bridge names two connections, `object1` and `object2`, and a
//! [`BridgeDirection`].  While active, every message received on one side is
//! written to the other side with `output_message`.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//!  Inactive ──activate()──► Activating ──► Active
//!     ▲                         │            │
//!     │        (name error) ────┘      deactivate()
//!     │                                      ▼
//!     └────────────────────────────── Deactivating
//! ```
//!
//! - `activate()` resolves both names first.  If either is empty or not
//!   registered, nothing is touched and the bridge returns to `Inactive`.
//! - It then remembers each connection's active flag, *detaches* the
//!   configured routes the connection already had, and installs one
//!   always-use forwarding route per allowed direction.  Routes installed by
//!   other bridges stay where they are.
//! - `deactivate()` restores the active flags, removes only the routes this
//!   bridge installed, and re-attaches the detached routes in front of
//!   anything added while the bridge was up.  A detached route whose name is
//!   already back on the connection (after a `RESET`, say) is not re-added.
//! - A bridge from a connection to itself installs a single forwarding route.
//!
//! # Forwarding rules
//!
//! The forwarding route's sink re-resolves both ends on every message.  If
//! either end is inactive, or the direction does not allow this leg, the
//! message is dropped quietly (counted, logged at debug).  Inactive endpoints
//! are normal operating state, not a fault.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use iotmsg_core::{FilterSet, Message};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::application::connection::{lock_connection, NameRegistry, SharedConnection};
use crate::application::route::{MessageSink, Route, RouteError, RouteKind, RouteOwner, RouteTable};

/// Error type for bridge lifecycle operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("bridge '{bridge}' has no {which} configured")]
    MissingEndpoint { bridge: String, which: &'static str },

    #[error("bridge '{bridge}' cannot resolve connection '{name}'")]
    UnknownEndpoint { bridge: String, name: String },

    #[error("bridge '{0}' is already active")]
    AlreadyActive(String),

    #[error("bridge '{0}' is not active")]
    NotActive(String),
}

// ── Direction and state ───────────────────────────────────────────────────────

/// Which legs of a bridge forward traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeDirection {
    #[default]
    Bidirectional,
    OneToTwoOnly,
    TwoToOneOnly,
}

/// One leg of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeLeg {
    OneToTwo,
    TwoToOne,
}

impl BridgeDirection {
    pub fn allows(self, leg: BridgeLeg) -> bool {
        matches!(
            (self, leg),
            (BridgeDirection::Bidirectional, _)
                | (BridgeDirection::OneToTwoOnly, BridgeLeg::OneToTwo)
                | (BridgeDirection::TwoToOneOnly, BridgeLeg::TwoToOne)
        )
    }
}

impl fmt::Display for BridgeLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeLeg::OneToTwo => f.write_str("1>2"),
            BridgeLeg::TwoToOne => f.write_str("2>1"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Inactive,
    Activating,
    Active,
    Deactivating,
}

/// Point-in-time copy of a bridge's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub one_to_two: u64,
    pub two_to_one: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct BridgeCounters {
    one_to_two: AtomicU64,
    two_to_one: AtomicU64,
    dropped: AtomicU64,
}

impl BridgeCounters {
    fn record_forward(&self, leg: BridgeLeg) {
        let counter = match leg {
            BridgeLeg::OneToTwo => &self.one_to_two,
            BridgeLeg::TwoToOne => &self.two_to_one,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            one_to_two: self.one_to_two.load(Ordering::Relaxed),
            two_to_one: self.two_to_one.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// What `activate()` took away and `deactivate()` must give back.
struct SavedEndpoints {
    active1: bool,
    active2: bool,
    routes1: RouteTable,
    routes2: RouteTable,
}

// ── Bridge ────────────────────────────────────────────────────────────────────

pub struct Bridge {
    id: Uuid,
    name: String,
    object1: String,
    object2: String,
    direction: BridgeDirection,
    state: BridgeState,
    registry: Arc<dyn NameRegistry>,
    counters: Arc<BridgeCounters>,
    saved: Option<SavedEndpoints>,
}

impl Bridge {
    pub fn new(
        name: impl Into<String>,
        object1: impl Into<String>,
        object2: impl Into<String>,
        direction: BridgeDirection,
        registry: Arc<dyn NameRegistry>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            object1: object1.into(),
            object2: object2.into(),
            direction,
            state: BridgeState::Inactive,
            registry,
            counters: Arc::new(BridgeCounters::default()),
            saved: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object1(&self) -> &str {
        &self.object1
    }

    pub fn object2(&self) -> &str {
        &self.object2
    }

    pub fn direction(&self) -> BridgeDirection {
        self.direction
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == BridgeState::Active
    }

    pub fn stats(&self) -> BridgeStats {
        self.counters.snapshot()
    }

    /// Wires the two connections together.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::AlreadyActive`] if the bridge is already up.
    /// - [`BridgeError::MissingEndpoint`] / [`BridgeError::UnknownEndpoint`]
    ///   if either name is empty or unregistered.  No connection is modified.
    pub fn activate(&mut self) -> Result<(), BridgeError> {
        if self.state != BridgeState::Inactive {
            return Err(BridgeError::AlreadyActive(self.name.clone()));
        }
        self.state = BridgeState::Activating;

        let (conn1, conn2) = match self.resolve_endpoints() {
            Ok(pair) => pair,
            Err(e) => {
                error!("bridge '{}' activation failed: {e}", self.name);
                self.state = BridgeState::Inactive;
                return Err(e);
            }
        };
        let same = Arc::ptr_eq(&conn1, &conn2);

        let (active1, routes1) = {
            let mut c = lock_connection(&conn1);
            (c.is_active(), c.routes_mut().take_owned_by(RouteOwner::Configured))
        };
        let (active2, routes2) = if same {
            (active1, RouteTable::new())
        } else {
            let mut c = lock_connection(&conn2);
            (c.is_active(), c.routes_mut().take_owned_by(RouteOwner::Configured))
        };

        let one_to_two = self.direction.allows(BridgeLeg::OneToTwo);
        if one_to_two {
            let route = self.forwarding_route(BridgeLeg::OneToTwo);
            lock_connection(&conn1).routes_mut().push(route);
        }
        // Both legs of a self-bridge are the same route.
        if self.direction.allows(BridgeLeg::TwoToOne) && !(same && one_to_two) {
            let route = self.forwarding_route(BridgeLeg::TwoToOne);
            lock_connection(&conn2).routes_mut().push(route);
        }

        self.saved = Some(SavedEndpoints {
            active1,
            active2,
            routes1,
            routes2,
        });
        self.state = BridgeState::Active;
        info!(
            "bridge '{}' active: {} <-> {} ({:?})",
            self.name, self.object1, self.object2, self.direction
        );
        Ok(())
    }

    /// Unwires the bridge and gives each connection back its earlier routes
    /// and active flag.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::NotActive`] if the bridge is not up.
    /// - [`BridgeError::UnknownEndpoint`] if an endpoint can no longer be
    ///   resolved; the bridge then stays `Active` with its saved state intact.
    pub fn deactivate(&mut self) -> Result<(), BridgeError> {
        if self.state != BridgeState::Active {
            return Err(BridgeError::NotActive(self.name.clone()));
        }
        self.state = BridgeState::Deactivating;

        let (conn1, conn2) = match self.resolve_endpoints() {
            Ok(pair) => pair,
            Err(e) => {
                error!("bridge '{}' deactivation failed: {e}", self.name);
                self.state = BridgeState::Active;
                return Err(e);
            }
        };
        let same = Arc::ptr_eq(&conn1, &conn2);
        let owner = RouteOwner::Bridge(self.id);

        if let Some(saved) = self.saved.take() {
            {
                let mut c = lock_connection(&conn1);
                c.set_active(saved.active1);
                c.routes_mut().remove_owned_by(owner);
                c.routes_mut().prepend_missing(saved.routes1);
            }
            if !same {
                let mut c = lock_connection(&conn2);
                c.set_active(saved.active2);
                c.routes_mut().remove_owned_by(owner);
                c.routes_mut().prepend_missing(saved.routes2);
            }
        }

        self.state = BridgeState::Inactive;
        info!("bridge '{}' inactive", self.name);
        Ok(())
    }

    fn resolve_endpoints(&self) -> Result<(SharedConnection, SharedConnection), BridgeError> {
        let conn1 = self.resolve(&self.object1, "object1")?;
        let conn2 = self.resolve(&self.object2, "object2")?;
        Ok((conn1, conn2))
    }

    fn resolve(&self, name: &str, which: &'static str) -> Result<SharedConnection, BridgeError> {
        if name.is_empty() {
            return Err(BridgeError::MissingEndpoint {
                bridge: self.name.clone(),
                which,
            });
        }
        self.registry
            .lookup_by_name(name)
            .ok_or_else(|| BridgeError::UnknownEndpoint {
                bridge: self.name.clone(),
                name: name.to_string(),
            })
    }

    fn forwarding_route(&self, leg: BridgeLeg) -> Route {
        let (from, to) = match leg {
            BridgeLeg::OneToTwo => (&self.object1, &self.object2),
            BridgeLeg::TwoToOne => (&self.object2, &self.object1),
        };
        let forwarder = BridgeForwarder {
            bridge: self.name.clone(),
            leg,
            direction: self.direction,
            from: from.clone(),
            to: to.clone(),
            registry: Arc::clone(&self.registry),
            counters: Arc::clone(&self.counters),
        };
        Route::new(format!("bridge:{}:{leg}", self.name), FilterSet::new())
            .with_kind(RouteKind::Command)
            .with_always_use(true)
            .with_sink(Arc::new(forwarder))
            .owned_by(RouteOwner::Bridge(self.id))
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("object1", &self.object1)
            .field("object2", &self.object2)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("stats", &self.stats())
            .finish()
    }
}

// ── Forwarding sink ───────────────────────────────────────────────────────────

/// Sink behind a bridge's forwarding route.
struct BridgeForwarder {
    bridge: String,
    leg: BridgeLeg,
    direction: BridgeDirection,
    from: String,
    to: String,
    registry: Arc<dyn NameRegistry>,
    counters: Arc<BridgeCounters>,
}

impl BridgeForwarder {
    fn drop_message(&self, why: &str) {
        self.counters.record_drop();
        debug!("bridge '{}' {} dropped a message: {why}", self.bridge, self.leg);
    }

    fn is_active(&self, name: &str) -> Result<bool, RouteError> {
        let conn = self
            .registry
            .lookup_by_name(name)
            .ok_or_else(|| RouteError::UnknownConnection(name.to_string()))?;
        let active = lock_connection(&conn).is_active();
        Ok(active)
    }
}

impl MessageSink for BridgeForwarder {
    fn deliver(&self, _source: &str, _route: &Route, message: &Message) -> Result<(), RouteError> {
        if !self.direction.allows(self.leg) {
            self.drop_message("direction not allowed");
            return Ok(());
        }
        if !self.is_active(&self.from)? {
            self.drop_message("source inactive");
            return Ok(());
        }

        let peer = self
            .registry
            .lookup_by_name(&self.to)
            .ok_or_else(|| RouteError::UnknownConnection(self.to.clone()))?;
        let mut peer = lock_connection(&peer);
        if !peer.is_active() {
            self.drop_message("peer inactive");
            return Ok(());
        }

        self.counters.record_forward(self.leg);
        peer.output_message(message)?;
        peer.core_mut().counters.transmitted += 1;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

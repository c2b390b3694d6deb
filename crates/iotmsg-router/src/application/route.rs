//! Routes: named, filtered subscriptions that decide where an inbound message goes.
//!
//! Every connection owns an ordered [`RouteTable`].  When the connection
//! produces an inbound [`Message`], the table walks its routes in order and
//! each route decides, through its [`FilterSet`], whether it accepts the
//! message.
//!
//! # What happens to an accepted message? (for beginners)
//!
//! A route has up to two delivery targets, and it may have both:
//!
//! - a **buffer** ([`RouteBuffer`]): a bounded FIFO that some consumer
//!   (a device driver, a script engine) drains at its own pace.  If the
//!   buffer is full the message is dropped for this route, a warning is
//!   logged, and dispatch carries on.
//!
//! - a **sink** ([`MessageSink`]): a callback invoked synchronously.  Bridges
//!   use sinks to forward messages to another connection; the outbound-queue
//!   adapter uses one to turn a message back into a line of text.
//!
//! After delivery, `stop_if_handled` decides whether later routes in the
//! table still get to see the same message.
//!
//! ```text
//! inbound ──► R1 (filter: starts_with "relay", stop_if_handled)
//!                │ accepted ──► buffer "relays"            ── stop
//!                │ rejected
//!                ▼
//!             R2 (always_use) ──► sink: log
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use iotmsg_core::{BoundedQueue, CodecError, FilterSet, Message, QueueFull};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::connection::ConnectionError;
use crate::application::outbound::OutboundError;

/// Error returned by a [`MessageSink`] when it could not deliver a message.
///
/// Delivery failures are local to one route: dispatch logs them and moves on
/// to the next route.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The message could not be encoded for the wire.
    #[error("cannot encode message: {0}")]
    Codec(#[from] CodecError),

    /// The outbound queue stayed full for every retry attempt.
    #[error(transparent)]
    Outbound(#[from] OutboundError),

    /// The target connection rejected the message.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A connection name the sink depends on is not registered.
    #[error("connection not registered: {0}")]
    UnknownConnection(String),
}

// ── Route metadata ────────────────────────────────────────────────────────────

/// What kind of traffic a route carries.  Informational; dispatch ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    Command,
    Request,
    Response,
    #[default]
    None,
}

/// Who installed a route.
///
/// Bridges tag the routes they install with their own id so that
/// deactivation removes exactly those routes and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteOwner {
    /// Declared in configuration, by the default-route policy, or by code.
    #[default]
    Configured,
    /// Installed by the bridge with this id.
    Bridge(Uuid),
}

// ── Delivery targets ──────────────────────────────────────────────────────────

/// Callback invoked synchronously for every message a route accepts.
///
/// `source` is the name of the connection the message arrived on.
///
/// Implementations must not lock the source connection for longer than a
/// single call: dispatch runs with no connection lock held, and a sink is free
/// to look up and lock any connection, including the source itself.
#[cfg_attr(test, mockall::automock)]
pub trait MessageSink: Send + Sync {
    fn deliver(&self, source: &str, route: &Route, message: &Message) -> Result<(), RouteError>;
}

/// One entry in a route buffer: the accepted message plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedMessage {
    /// Name of the connection the message arrived on.
    pub source: String,
    pub message: Message,
}

/// A bounded buffer shared between a route and whoever consumes it.
///
/// Cloning a `RouteBuffer` clones the handle, not the contents.
#[derive(Clone)]
pub struct RouteBuffer {
    inner: Arc<Mutex<BoundedQueue<BufferedMessage>>>,
}

impl RouteBuffer {
    pub fn new(label: impl Into<String>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BoundedQueue::new(label, capacity))),
        }
    }

    /// Appends a message.  Never blocks; hands the item back when full.
    pub fn push(&self, item: BufferedMessage) -> Result<(), QueueFull<BufferedMessage>> {
        self.lock().push(item)
    }

    /// Removes the oldest message, logging a warning if the buffer is empty.
    pub fn pop(&self) -> Option<BufferedMessage> {
        self.lock().pop()
    }

    /// Removes and returns every buffered message in FIFO order.
    pub fn drain(&self) -> Vec<BufferedMessage> {
        let mut queue = self.lock();
        let mut items = Vec::with_capacity(queue.len());
        while !queue.is_empty() {
            if let Some(item) = queue.pop() {
                items.push(item);
            }
        }
        items
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    pub fn label(&self) -> String {
        self.lock().label().to_string()
    }

    fn lock(&self) -> MutexGuard<'_, BoundedQueue<BufferedMessage>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RouteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.lock();
        f.debug_struct("RouteBuffer")
            .field("label", &queue.label())
            .field("len", &queue.len())
            .field("capacity", &queue.capacity())
            .finish()
    }
}

// ── Route ─────────────────────────────────────────────────────────────────────

/// A named, filtered subscription on a connection.
#[derive(Clone)]
pub struct Route {
    pub name: String,
    pub kind: RouteKind,
    pub filter: FilterSet,
    /// Deliver every message regardless of the filter outcome.
    pub always_use: bool,
    /// Stop evaluating later routes once this one has accepted a message.
    pub stop_if_handled: bool,
    pub buffer: Option<RouteBuffer>,
    pub sink: Option<Arc<dyn MessageSink>>,
    pub owner: RouteOwner,
}

impl Route {
    /// Creates a route with no delivery targets and both flags cleared.
    pub fn new(name: impl Into<String>, filter: FilterSet) -> Self {
        Self {
            name: name.into(),
            kind: RouteKind::None,
            filter,
            always_use: false,
            stop_if_handled: false,
            buffer: None,
            sink: None,
            owner: RouteOwner::Configured,
        }
    }

    pub fn with_kind(mut self, kind: RouteKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_always_use(mut self, always_use: bool) -> Self {
        self.always_use = always_use;
        self
    }

    pub fn with_stop_if_handled(mut self, stop: bool) -> Self {
        self.stop_if_handled = stop;
        self
    }

    pub fn with_buffer(mut self, buffer: RouteBuffer) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn owned_by(mut self, owner: RouteOwner) -> Self {
        self.owner = owner;
        self
    }

    /// Returns the copy of `message` this route would deliver, or `None` if
    /// the route rejects it.
    ///
    /// A filter match wins over `always_use` so that a Plain prefix filter
    /// still strips its prefix on a forced route.
    pub fn accepts(&self, message: &Message) -> Option<Message> {
        match self.filter.accept(message) {
            Some(accepted) => Some(accepted),
            None if self.always_use => Some(message.clone()),
            None => None,
        }
    }

    /// True if the route can ever accept a message.
    pub fn is_enabled(&self) -> bool {
        self.always_use || self.filter.is_active()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("filter", &self.filter)
            .field("always_use", &self.always_use)
            .field("stop_if_handled", &self.stop_if_handled)
            .field("buffer", &self.buffer)
            .field("has_sink", &self.sink.is_some())
            .field("owner", &self.owner)
            .finish()
    }
}

// ── RouteTable ────────────────────────────────────────────────────────────────

/// Counts of what happened to one inbound message (or a batch of them).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Routes that accepted the message.
    pub accepted: usize,
    /// Copies pushed onto route buffers.
    pub buffered: usize,
    /// Successful sink deliveries.
    pub forwarded: usize,
    /// Full buffers plus failed sink deliveries.
    pub failures: usize,
}

impl DispatchReport {
    /// Adds another report's counts to this one.
    pub fn absorb(&mut self, other: DispatchReport) {
        self.accepted += other.accepted;
        self.buffered += other.buffered;
        self.forwarded += other.forwarded;
        self.failures += other.failures;
    }
}

/// An ordered list of routes owned by one connection.
///
/// Cloning the table clones the route definitions; buffers and sinks are
/// shared handles, so a clone delivers to the same places as the original.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route at the end of the evaluation order.
    pub fn push(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Looks up a route by name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    /// Sets `always_use` on every route called `name`.
    ///
    /// Returns the number of routes updated (0 if the name is unknown).
    pub fn set_always_use(&mut self, name: &str, always_use: bool) -> usize {
        let mut updated = 0;
        for route in self
            .routes
            .iter_mut()
            .filter(|r| r.name.eq_ignore_ascii_case(name))
        {
            route.always_use = always_use;
            updated += 1;
        }
        updated
    }

    /// Moves the routes installed by `owner` out, keeping the rest in order.
    pub fn take_owned_by(&mut self, owner: RouteOwner) -> RouteTable {
        let (taken, kept): (Vec<Route>, Vec<Route>) = std::mem::take(&mut self.routes)
            .into_iter()
            .partition(|r| r.owner == owner);
        self.routes = kept;
        RouteTable { routes: taken }
    }

    /// Inserts `front` ahead of the current routes, skipping any route whose
    /// name (ignoring ASCII case) is already present.
    ///
    /// Returns the number of routes inserted.
    pub fn prepend_missing(&mut self, front: RouteTable) -> usize {
        let missing: Vec<Route> = front
            .routes
            .into_iter()
            .filter(|r| self.get(&r.name).is_none())
            .collect();
        let inserted = missing.len();
        let tail = std::mem::replace(&mut self.routes, missing);
        self.routes.extend(tail);
        inserted
    }

    /// Replaces the routes installed by `owner` with `routes`, placed ahead
    /// of the routes other owners installed.
    pub fn replace_owned_by(&mut self, owner: RouteOwner, routes: Vec<Route>) {
        let others = std::mem::replace(&mut self.routes, routes);
        self.routes.extend(others.into_iter().filter(|r| r.owner != owner));
    }

    /// Removes every route installed by `owner`, returning how many were removed.
    pub fn remove_owned_by(&mut self, owner: RouteOwner) -> usize {
        let before = self.routes.len();
        self.routes.retain(|r| r.owner != owner);
        before - self.routes.len()
    }

    /// Runs `message` through the routes in order.
    ///
    /// Each accepting route gets its own copy, so a Plain prefix strip done
    /// by one route never leaks into the next.  Delivery failures are logged
    /// and counted; they never abort dispatch.
    pub fn dispatch(&self, source: &str, message: &Message) -> DispatchReport {
        let mut report = DispatchReport::default();

        for route in &self.routes {
            let Some(accepted) = route.accepts(message) else {
                continue;
            };
            report.accepted += 1;

            if let Some(buffer) = &route.buffer {
                let item = BufferedMessage {
                    source: source.to_string(),
                    message: accepted.clone(),
                };
                match buffer.push(item) {
                    Ok(()) => report.buffered += 1,
                    Err(full) => {
                        debug!(
                            "route '{}' on '{source}' dropped a message: {full}",
                            route.name
                        );
                        report.failures += 1;
                    }
                }
            }

            if let Some(sink) = &route.sink {
                match sink.deliver(source, route, &accepted) {
                    Ok(()) => report.forwarded += 1,
                    Err(e) => {
                        warn!("route '{}' on '{source}' failed to deliver: {e}", route.name);
                        report.failures += 1;
                    }
                }
            }

            if route.stop_if_handled {
                debug!("route '{}' on '{source}' handled the message; stopping", route.name);
                break;
            }
        }

        report
    }
}

impl FromIterator<Route> for RouteTable {
    fn from_iter<I: IntoIterator<Item = Route>>(iter: I) -> Self {
        Self {
            routes: iter.into_iter().collect(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! ConnectionManager: drives the poll cycle, drains the outbound queue and
//! serves the administrative command surface.
//!
//! # One poll tick (for beginners)
//!
//! ```text
//! poll()
//!  ├─ for each *active* connection, in registration order
//!  │    ├─ poll_inputs(poll_max)          -- decoded inbound messages
//!  │    ├─ route table snapshot .dispatch -- buffers, bridges, queue sinks
//!  │    └─ poll_outputs(poll_max)         -- let the transport flush
//!  └─ drain up to `drain_batch` outbound items
//!       ├─ target active   ──► send_queued_output(text)
//!       └─ target inactive ──► discard with a warning
//! ```
//!
//! `poll()` is guarded against re-entry: if something called from inside a
//! tick (a sink, a transport) calls `poll()` again, the nested call returns
//! `None` immediately instead of re-polling connections mid-cycle.
//!
//! The route table is cloned before dispatch so that no connection lock is
//! held while routes run.  A bridge route can then lock its peer, or even its
//! own connection, without deadlocking.
//!
//! # Admin commands
//!
//! `interact("<name> <ACTION> [args...]")`, action case-insensitive:
//!
//! | action                     | effect                                          |
//! |----------------------------|-------------------------------------------------|
//! | `ALWAYSUSE r1 r2 ...`      | set `always_use` on the named routes            |
//! | `NOALWAYSUSE r1 r2 ...`    | clear it                                        |
//! | `RESET`                    | replace the configured routes with the defaults |
//! | `SEND <text>`              | queue `<text>` for output on the connection     |
//! | `ACTIVATE` / `DEACTIVATE`  | toggle a connection, or bring a bridge up/down  |
//! | `STATUS`                   | log and return counters and route state         |

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::bridge::{Bridge, BridgeError, BridgeStats};
use crate::application::connection::{
    lock_connection, ConnectionCounters, ConnectionRegistry, NameRegistry, RegistryError,
    SharedConnection,
};
use crate::application::outbound::{OutboundError, OutboundQueue};
use crate::application::route::{DispatchReport, Route, RouteOwner};

/// Default maximum number of inbound messages taken per connection per tick.
pub const DEFAULT_POLL_MAX: usize = 8;

/// Default number of outbound items drained per tick.
pub const DEFAULT_DRAIN_BATCH: usize = 5;

/// Error type for administrative commands.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("empty command")]
    Empty,

    #[error("missing action for '{0}'")]
    MissingAction(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("no connection or bridge named '{0}'")]
    UnknownTarget(String),

    #[error("{action} needs an argument")]
    MissingArgument { action: AdminAction },

    #[error("{action} is not supported on bridge '{bridge}'")]
    NotForBridge { action: AdminAction, bridge: String },

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Outbound(#[from] OutboundError),
}

// ── Admin command model ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    AlwaysUse,
    NoAlwaysUse,
    Reset,
    Send,
    Activate,
    Deactivate,
    Status,
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdminAction::AlwaysUse => "ALWAYSUSE",
            AdminAction::NoAlwaysUse => "NOALWAYSUSE",
            AdminAction::Reset => "RESET",
            AdminAction::Send => "SEND",
            AdminAction::Activate => "ACTIVATE",
            AdminAction::Deactivate => "DEACTIVATE",
            AdminAction::Status => "STATUS",
        };
        f.write_str(s)
    }
}

impl FromStr for AdminAction {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALWAYSUSE" => Ok(AdminAction::AlwaysUse),
            "NOALWAYSUSE" => Ok(AdminAction::NoAlwaysUse),
            "RESET" => Ok(AdminAction::Reset),
            "SEND" => Ok(AdminAction::Send),
            "ACTIVATE" => Ok(AdminAction::Activate),
            "DEACTIVATE" => Ok(AdminAction::Deactivate),
            "STATUS" => Ok(AdminAction::Status),
            _ => Err(AdminError::UnknownAction(s.to_string())),
        }
    }
}

/// A parsed admin command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCommand {
    pub target: String,
    pub action: AdminAction,
    /// Everything after the action, leading whitespace removed.
    pub args: String,
}

impl AdminCommand {
    /// Parses `<target> <ACTION> [args...]`.
    ///
    /// # Errors
    ///
    /// [`AdminError::Empty`], [`AdminError::MissingAction`] or
    /// [`AdminError::UnknownAction`].
    pub fn parse(line: &str) -> Result<Self, AdminError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(AdminError::Empty);
        }
        let (target, rest) = split_word(line);
        let (action, args) = split_word(rest);
        if action.is_empty() {
            return Err(AdminError::MissingAction(target.to_string()));
        }
        Ok(Self {
            target: target.to_string(),
            action: action.parse()?,
            args: args.to_string(),
        })
    }
}

/// Splits off the first whitespace-delimited word; the rest is left-trimmed.
fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (s, ""),
    }
}

/// Route state reported by `STATUS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteStatus {
    pub name: String,
    pub always_use: bool,
    pub stop_if_handled: bool,
    /// Depth of the route's buffer, if it has one.
    pub buffered: Option<usize>,
}

/// Connection state reported by `STATUS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub name: String,
    pub active: bool,
    pub counters: ConnectionCounters,
    pub routes: Vec<RouteStatus>,
}

/// What an admin command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminOutcome {
    /// `ALWAYSUSE` / `NOALWAYSUSE`: routes updated.
    RoutesUpdated(usize),
    /// `RESET`: routes installed by the policy.
    RoutesReset(usize),
    /// `SEND`: text queued.
    Queued,
    /// `ACTIVATE` / `DEACTIVATE` on a connection or bridge.
    ActiveSet(bool),
    ConnectionStatus(ConnectionStatus),
    BridgeStatus { name: String, active: bool, stats: BridgeStats },
}

/// Hook that supplies the routes `RESET` re-installs on a connection.
pub trait DefaultRoutePolicy: Send + Sync {
    fn default_routes(&self, connection: &str) -> Vec<Route>;
}

// ── Poll bookkeeping ──────────────────────────────────────────────────────────

/// Tuning knobs for one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Inbound messages taken per connection per tick, and the flush budget
    /// passed to `poll_outputs`.
    pub poll_max: usize,
    /// Outbound items drained per tick.
    pub drain_batch: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            poll_max: DEFAULT_POLL_MAX,
            drain_batch: DEFAULT_DRAIN_BATCH,
        }
    }
}

/// Summary of one poll tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Active connections polled.
    pub connections_polled: usize,
    /// Inbound messages received across all connections.
    pub inbound: usize,
    /// Combined dispatch counts for every inbound message.
    pub dispatch: DispatchReport,
    /// Outbound items handed to their target.
    pub drained: usize,
    /// Outbound items discarded (unknown or inactive target, transport error).
    pub discarded: usize,
}

/// Clears the polling flag when a tick ends, including by panic.
struct PollGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PollGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ── ConnectionManager ─────────────────────────────────────────────────────────

pub struct ConnectionManager {
    registry: Arc<ConnectionRegistry>,
    outbound: OutboundQueue,
    settings: ManagerSettings,
    route_policy: Option<Arc<dyn DefaultRoutePolicy>>,
    bridges: Mutex<Vec<Bridge>>,
    polling: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        outbound: OutboundQueue,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            registry,
            outbound,
            settings,
            route_policy: None,
            bridges: Mutex::new(Vec::new()),
            polling: AtomicBool::new(false),
        }
    }

    /// Installs the hook `RESET` uses to rebuild a connection's routes.
    pub fn with_route_policy(mut self, policy: Arc<dyn DefaultRoutePolicy>) -> Self {
        self.route_policy = Some(policy);
        self
    }

    /// Registers a connection; see [`ConnectionRegistry::register`].
    pub fn register(&self, connection: SharedConnection) -> Result<(), RegistryError> {
        self.registry.register(connection)
    }

    /// Takes ownership of a bridge so admin commands can reach it by name.
    pub fn add_bridge(&self, bridge: Bridge) {
        info!("managing bridge '{}'", bridge.name());
        self.lock_bridges().push(bridge);
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    pub fn settings(&self) -> ManagerSettings {
        self.settings
    }

    /// True while a poll tick is running.
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// Runs `f` on the bridge called `name`, if there is one.
    pub fn with_bridge<R>(&self, name: &str, f: impl FnOnce(&mut Bridge) -> R) -> Option<R> {
        let mut bridges = self.lock_bridges();
        bridges
            .iter_mut()
            .find(|b| b.name().eq_ignore_ascii_case(name))
            .map(f)
    }

    /// Brings down every active bridge, restoring the routes they replaced.
    pub fn deactivate_bridges(&self) {
        for bridge in self.lock_bridges().iter_mut().filter(|b| b.is_active()) {
            if let Err(e) = bridge.deactivate() {
                warn!("could not deactivate bridge '{}': {e}", bridge.name());
            }
        }
    }

    // ── Poll cycle ────────────────────────────────────────────────────────────

    /// Runs one poll tick.
    ///
    /// Returns `None` without doing anything if a tick is already running.
    pub fn poll(&self) -> Option<PollReport> {
        let Some(_guard) = PollGuard::acquire(&self.polling) else {
            debug!("poll already in progress; skipping nested call");
            return None;
        };

        let mut report = PollReport::default();
        for connection in self.registry.all() {
            self.poll_connection(&connection, &mut report);
        }
        self.drain_outbound(&mut report);
        Some(report)
    }

    fn poll_connection(&self, connection: &SharedConnection, report: &mut PollReport) {
        let max = self.settings.poll_max;

        // Collect input and snapshot the routes, then release the lock.
        let (name, inbound, routes) = {
            let mut conn = lock_connection(connection);
            if !conn.is_active() {
                return;
            }
            let inbound = conn.poll_inputs(max);
            conn.core_mut().counters.received += inbound.len() as u64;
            (conn.name().to_string(), inbound, conn.routes().clone())
        };

        report.connections_polled += 1;
        report.inbound += inbound.len();
        for message in &inbound {
            report.dispatch.absorb(routes.dispatch(&name, message));
        }

        let mut conn = lock_connection(connection);
        if let Err(e) = conn.poll_outputs(max) {
            warn!("poll_outputs failed on '{name}': {e}");
        }
    }

    fn drain_outbound(&self, report: &mut PollReport) {
        for _ in 0..self.settings.drain_batch {
            let Some(item) = self.outbound.pop() else {
                break;
            };

            let Some(connection) = self.registry.lookup_by_name(&item.target) else {
                warn!("discarding output for unknown connection '{}'", item.target);
                report.discarded += 1;
                continue;
            };

            let mut conn = lock_connection(&connection);
            if !conn.is_active() {
                warn!("discarding output for inactive connection '{}'", item.target);
                conn.core_mut().counters.dropped += 1;
                report.discarded += 1;
                continue;
            }
            match conn.send_queued_output(&item.text) {
                Ok(()) => {
                    conn.core_mut().counters.transmitted += 1;
                    report.drained += 1;
                }
                Err(e) => {
                    error!("send to '{}' failed, output dropped: {e}", item.target);
                    conn.core_mut().counters.dropped += 1;
                    report.discarded += 1;
                }
            }
        }
    }

    /// Queues `text` for output on `target`.
    ///
    /// Blocks for up to the retry policy's total delay when the queue is full.
    ///
    /// # Errors
    ///
    /// [`OutboundError::Exhausted`] once every attempt failed; the text is dropped.
    pub fn queue_output(&self, target: &str, text: &str) -> Result<(), OutboundError> {
        self.outbound.queue_output(target, text)
    }

    // ── Administrative interface ──────────────────────────────────────────────

    /// Executes one admin command line.  Failures are logged and returned.
    pub fn interact(&self, line: &str) -> Result<AdminOutcome, AdminError> {
        let result = AdminCommand::parse(line).and_then(|cmd| self.execute(&cmd));
        match &result {
            Ok(outcome) => debug!("admin '{}' -> {outcome:?}", line.trim()),
            Err(e) => error!("admin command '{}' failed: {e}", line.trim()),
        }
        result
    }

    fn execute(&self, cmd: &AdminCommand) -> Result<AdminOutcome, AdminError> {
        if let Some(connection) = self.registry.lookup_by_name(&cmd.target) {
            return self.execute_on_connection(&connection, cmd);
        }
        let on_bridge = self.with_bridge(&cmd.target, |bridge| execute_on_bridge(bridge, cmd));
        if let Some(result) = on_bridge {
            return result;
        }
        Err(AdminError::UnknownTarget(cmd.target.clone()))
    }

    fn execute_on_connection(
        &self,
        connection: &SharedConnection,
        cmd: &AdminCommand,
    ) -> Result<AdminOutcome, AdminError> {
        match cmd.action {
            AdminAction::AlwaysUse | AdminAction::NoAlwaysUse => {
                let flag = cmd.action == AdminAction::AlwaysUse;
                let names: Vec<&str> = cmd.args.split_whitespace().collect();
                if names.is_empty() {
                    return Err(AdminError::MissingArgument { action: cmd.action });
                }
                let mut conn = lock_connection(connection);
                let mut updated = 0;
                for name in names {
                    match conn.routes_mut().set_always_use(name, flag) {
                        0 => warn!("connection '{}' has no route '{name}'", conn.name()),
                        n => updated += n,
                    }
                }
                info!("{} {}: {updated} route(s) updated", conn.name(), cmd.action);
                Ok(AdminOutcome::RoutesUpdated(updated))
            }
            AdminAction::Reset => {
                let name = lock_connection(connection).name().to_string();
                let defaults = match &self.route_policy {
                    Some(policy) => policy.default_routes(&name),
                    None => {
                        info!("no default-route policy; RESET clears '{name}'");
                        Vec::new()
                    }
                };
                let installed = defaults.len();
                // Routes installed by an active bridge stay in place.
                lock_connection(connection)
                    .routes_mut()
                    .replace_owned_by(RouteOwner::Configured, defaults);
                info!("{name} RESET: {installed} default route(s) installed");
                Ok(AdminOutcome::RoutesReset(installed))
            }
            AdminAction::Send => {
                if cmd.args.is_empty() {
                    return Err(AdminError::MissingArgument { action: cmd.action });
                }
                let name = lock_connection(connection).name().to_string();
                self.queue_output(&name, &cmd.args)?;
                Ok(AdminOutcome::Queued)
            }
            AdminAction::Activate | AdminAction::Deactivate => {
                let active = cmd.action == AdminAction::Activate;
                let mut conn = lock_connection(connection);
                conn.set_active(active);
                let verb = if active { "activated" } else { "deactivated" };
                info!("connection '{}' {verb}", conn.name());
                Ok(AdminOutcome::ActiveSet(active))
            }
            AdminAction::Status => {
                let status = connection_status(connection);
                info!(
                    "{}: active={} rx={} tx={} dropped={} routes={:?}",
                    status.name,
                    status.active,
                    status.counters.received,
                    status.counters.transmitted,
                    status.counters.dropped,
                    status.routes
                );
                Ok(AdminOutcome::ConnectionStatus(status))
            }
        }
    }

    fn lock_bridges(&self) -> MutexGuard<'_, Vec<Bridge>> {
        self.bridges.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn execute_on_bridge(bridge: &mut Bridge, cmd: &AdminCommand) -> Result<AdminOutcome, AdminError> {
    match cmd.action {
        AdminAction::Activate => {
            bridge.activate()?;
            Ok(AdminOutcome::ActiveSet(true))
        }
        AdminAction::Deactivate => {
            bridge.deactivate()?;
            Ok(AdminOutcome::ActiveSet(false))
        }
        AdminAction::Status => {
            let stats = bridge.stats();
            info!(
                "bridge {}: state={:?} 1>2={} 2>1={} dropped={}",
                bridge.name(),
                bridge.state(),
                stats.one_to_two,
                stats.two_to_one,
                stats.dropped
            );
            Ok(AdminOutcome::BridgeStatus {
                name: bridge.name().to_string(),
                active: bridge.is_active(),
                stats,
            })
        }
        action => Err(AdminError::NotForBridge {
            action,
            bridge: bridge.name().to_string(),
        }),
    }
}

fn connection_status(connection: &SharedConnection) -> ConnectionStatus {
    let conn = lock_connection(connection);
    ConnectionStatus {
        name: conn.name().to_string(),
        active: conn.is_active(),
        counters: conn.counters(),
        routes: conn
            .routes()
            .iter()
            .map(|r| RouteStatus {
                name: r.name.clone(),
                always_use: r.always_use,
                stop_if_handled: r.stop_if_handled,
                buffered: r.buffer.as_ref().map(|b| b.len()),
            })
            .collect(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

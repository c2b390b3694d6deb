//! The shared outbound text queue and its bounded retry.
//!
//! Any route, bridge or admin command can ask for a line of text to be sent
//! to a named connection.  Those requests go into one FIFO, and the
//! connection manager drains a few of them per poll tick.
//!
//! # Backpressure (for beginners)
//!
//! The queue has a fixed capacity.  When it is full, [`OutboundQueue::queue_output`]
//! does not give up straight away: it sleeps for `delay` and tries again,
//! up to `attempts` times in total.  With the defaults (10 attempts, 200 ms)
//! a stuck consumer costs a producer at most about two seconds, after which
//! the line is dropped and an error is logged.  The queue lock is never held
//! while sleeping, so other producers and the drain keep working meanwhile.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use iotmsg_core::{encode_wire_text, BoundedQueue, Message};
use thiserror::Error;
use tracing::{debug, error};

use crate::application::route::{MessageSink, Route, RouteError};

/// Default number of push attempts before output is dropped.
pub const DEFAULT_PUSH_ATTEMPTS: u32 = 10;

/// Default pause after each failed push.
pub const DEFAULT_PUSH_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Error type for outbound queueing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutboundError {
    #[error("outbound queue full; dropped output for '{target}' after {attempts} attempts")]
    Exhausted { target: String, attempts: u32 },
}

/// One line of text waiting to be sent to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundItem {
    /// Name of the connection that should transmit the text.
    pub target: String,
    pub text: String,
}

/// How hard `queue_output` tries before dropping a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total push attempts, including the first.  Zero behaves like one.
    pub attempts: u32,
    /// Sleep after each failed attempt.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_PUSH_ATTEMPTS,
            delay: DEFAULT_PUSH_RETRY_DELAY,
        }
    }
}

/// Cloneable handle to the shared outbound FIFO.
#[derive(Clone)]
pub struct OutboundQueue {
    inner: Arc<Mutex<BoundedQueue<OutboundItem>>>,
    policy: RetryPolicy,
}

impl OutboundQueue {
    pub fn new(capacity: usize, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BoundedQueue::new("outbound", capacity))),
            policy,
        }
    }

    /// Enqueues `text` for `target`, retrying while the queue is full.
    ///
    /// Blocks the calling thread for up to `attempts * delay`.
    ///
    /// # Errors
    ///
    /// Returns [`OutboundError::Exhausted`] once every attempt has failed;
    /// the text is dropped.
    pub fn queue_output(
        &self,
        target: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), OutboundError> {
        let attempts = self.policy.attempts.max(1);
        let mut item = OutboundItem {
            target: target.into(),
            text: text.into(),
        };

        for attempt in 1..=attempts {
            // Scope the lock so it is released before sleeping.
            let rejected = match self.lock().push(item) {
                Ok(()) => return Ok(()),
                Err(full) => full.into_item(),
            };
            debug!(
                "outbound push for '{}' failed (attempt {attempt}/{attempts})",
                rejected.target
            );
            item = rejected;
            thread::sleep(self.policy.delay);
        }

        error!(
            "outbound queue full; dropping output for '{}' after {attempts} attempts",
            item.target
        );
        Err(OutboundError::Exhausted {
            target: item.target,
            attempts,
        })
    }

    /// Removes the oldest item.  Returns `None` quietly when empty, because
    /// the manager asks on every tick.
    pub fn pop(&self) -> Option<OutboundItem> {
        let mut queue = self.lock();
        if queue.is_empty() {
            None
        } else {
            queue.pop()
        }
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

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, BoundedQueue<OutboundItem>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Route adapter ─────────────────────────────────────────────────────────────

/// A [`MessageSink`] that encodes accepted messages and queues them for
/// another connection.
pub struct QueueSink {
    queue: OutboundQueue,
    target: String,
}

impl QueueSink {
    pub fn new(queue: OutboundQueue, target: impl Into<String>) -> Self {
        Self {
            queue,
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl MessageSink for QueueSink {
    fn deliver(&self, source: &str, route: &Route, message: &Message) -> Result<(), RouteError> {
        let wire = encode_wire_text(message)?;
        debug!(
            "route '{}' queues output from '{source}' to '{}'",
            route.name, self.target
        );
        self.queue.queue_output(self.target.as_str(), wire)?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
